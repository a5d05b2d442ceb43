//! A shell script standing in for yt-dlp in the tests

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Behaviour is picked by the url, the last argument
const FAKE_TOOL: &str = r#"#!/bin/sh
tmpl=""
url=""
prev=""
for a in "$@"; do
  if [ "$prev" = "-o" ]; then tmpl="$a"; fi
  prev="$a"
  url="$a"
done
dir=$(dirname "$tmpl")
mp3=$(printf '%s' "$tmpl" | sed 's/%(ext)s/mp3/')
webm=$(printf '%s' "$tmpl" | sed 's/%(ext)s/webm/')
case "$url" in
  fake://ok/*)
    echo "[youtube] Extracting URL: $url"
    echo "[download] Destination: $webm"
    echo "[download]  10.0% of ~10MiB at 1MiB/s"
    echo "  45.2%  of ~10MiB"
    echo "[download] 100% of 10.00MiB in 00:00:02"
    echo "[ExtractAudio] Destination: $mp3"
    : > "$mp3"
    echo "[ExtractAudio] Destination: $mp3"
    echo "Deleting original file $webm (pass -k to keep)"
    exit 0 ;;
  fake://renamed/*)
    echo "[download]  50.0% of ~1MiB"
    echo "[ExtractAudio] Destination: $dir/renamed by tool.mp3"
    : > "$dir/renamed by tool.mp3"
    exit 0 ;;
  fake://fail/*)
    echo "  45.2%  of ~10MiB"
    echo "ERROR: [generic] Unable to download webpage" >&2
    exit 1 ;;
  fake://slow/*)
    echo "[download]   5.0% of ~10MiB"
    exec sleep 30 ;;
  fake://meta/*)
    echo '{"id":"abc","title":"Fake Title","thumbnail":"https://img/abc.jpg","duration":61.5,"uploader":"Someone"}'
    exit 0 ;;
  fake://badjson/*)
    echo 'this is not json'
    exit 0 ;;
  fake://huge/*)
    head -c 12000000 /dev/zero
    exit 0 ;;
  fake://noisy/*)
    head -c 12000000 /dev/zero >&2
    echo '{"id":"n","title":"Noisy"}'
    exit 0 ;;
  *)
    echo "ERROR: Unsupported URL: $url" >&2
    exit 1 ;;
esac
"#;

/// Written once before any test spawns it, so no test ever execs a file
/// another thread still has open for writing
pub fn fake_tool() -> &'static Path {
    static TOOL: OnceLock<(tempfile::TempDir, PathBuf)> = OnceLock::new();
    let (_, path) = TOOL.get_or_init(|| {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("yt-dlp");
        std::fs::write(&path, FAKE_TOOL).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        (dir, path)
    });
    path
}
