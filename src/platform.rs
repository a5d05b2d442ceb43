/// Known domain fragments and the label shown for them. Order matters, the
/// first fragment found in the url wins.
const PLATFORMS: &[(&str, &str)] = &[
    ("youtube.com", "YouTube"),
    ("youtu.be", "YouTube"),
    ("tiktok.com", "TikTok"),
    ("vimeo.com", "Vimeo"),
    ("twitter.com", "Twitter"),
    ("x.com", "Twitter"),
    ("instagram.com", "Instagram"),
    ("facebook.com", "Facebook"),
    ("fb.watch", "Facebook"),
    ("twitch.tv", "Twitch"),
    ("dailymotion.com", "Dailymotion"),
    ("soundcloud.com", "SoundCloud"),
    ("spotify.com", "Spotify"),
    ("reddit.com", "Reddit"),
    ("bilibili.com", "Bilibili"),
];

pub const OTHER: &str = "Other";

/// Guesses the source platform of a media url
pub fn detect(url: &str) -> &'static str {
    let url = url.to_lowercase();
    PLATFORMS
        .iter()
        .find(|(fragment, _)| url.contains(fragment))
        .map(|(_, label)| *label)
        .unwrap_or(OTHER)
}

#[cfg(test)]
mod checks {
    use super::*;
    #[test]
    fn check_known_domains() {
        assert_eq!(detect("https://www.youtube.com/watch?v=abc"), "YouTube");
        assert_eq!(detect("https://youtu.be/abc"), "YouTube");
        assert_eq!(detect("https://vm.tiktok.com/xyz"), "TikTok");
        assert_eq!(detect("https://fb.watch/1234"), "Facebook");
        assert_eq!(detect("https://x.com/someone/status/1"), "Twitter");
        assert_eq!(detect("https://www.bilibili.com/video/BV1"), "Bilibili");
    }
    #[test]
    fn check_case_insensitive() {
        assert_eq!(detect("HTTPS://WWW.YOUTUBE.COM/watch?v=abc"), "YouTube");
        assert_eq!(detect("https://SoundCloud.com/artist/track"), "SoundCloud");
    }
    #[test]
    fn check_first_match_wins() {
        // a reddit post linking to youtube is still labelled by the first
        // table entry found
        assert_eq!(detect("https://reddit.com/r/videos?u=youtube.com"), "YouTube");
    }
    #[test]
    fn check_fallback() {
        assert_eq!(detect("https://example.org/video.mp4"), OTHER);
        assert_eq!(detect(""), OTHER);
    }
}
