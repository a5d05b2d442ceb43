use nom::{
    bytes::complete::{tag, take_till, take_until},
    character::complete::{char, digit0, digit1},
    combinator::{opt, recognize},
    sequence::{pair, preceded, terminated},
    IResult,
};
use std::path::PathBuf;

/// Markers yt-dlp prints once the download part is over and ffmpeg takes over
const CONVERSION_MARKERS: &[&str] = &["[ExtractAudio]", "Deleting original"];

/// What a single line of tool output says, before any job state is applied
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LineSignals {
    pub conversion: bool,
    pub percent: Option<f64>,
    pub destination: Option<PathBuf>,
}

impl From<&str> for LineSignals {
    fn from(line: &str) -> Self {
        Self {
            conversion: CONVERSION_MARKERS.iter().any(|m| line.contains(m)),
            percent: find_percent(line),
            destination: find_destination(line),
        }
    }
}

fn percentage(input: &str) -> IResult<&str, f64> {
    let number = recognize(pair(digit1, opt(pair(char('.'), digit0))));
    let (i, n) = terminated(number, char('%'))(input)?;
    // digit1 guarantees at least one digit, "12." parses as 12
    Ok((i, n.trim_end_matches('.').parse().unwrap_or(0.0)))
}

/// Leftmost `<digits>[.<digits>]%` in the line. Only the start of each run
/// of digits is tried: a start inside a run fails the same way.
fn find_percent(line: &str) -> Option<f64> {
    let mut rest = line;
    loop {
        let start = rest.find(|c: char| c.is_ascii_digit())?;
        rest = &rest[start..];
        if let Ok((_, p)) = percentage(rest) {
            return Some(p);
        }
        let (after, _) = digit1::<_, nom::error::Error<&str>>(rest).ok()?;
        rest = after;
    }
}

fn destination(input: &str) -> IResult<&str, &str> {
    preceded(
        pair(take_until("Destination: "), tag("Destination: ")),
        take_till(|c: char| c == '\n' || c == '\r'),
    )(input)
}

fn find_destination(line: &str) -> Option<PathBuf> {
    let (_, path) = destination(line).ok()?;
    let path = path.trim();
    if path.is_empty() {
        None
    } else {
        Some(PathBuf::from(path))
    }
}

/// Per-job parser state. `converting` is a latch: once set it stays set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamState {
    pub converting: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The conversion latch was just set
    Converting,
    /// A download percentage was seen while still downloading
    Downloading(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub state: StreamState,
    pub event: Option<StreamEvent>,
    pub destination: Option<PathBuf>,
}

/// Feeds one line of tool output through the job's parser state
pub fn advance(state: StreamState, line: &str) -> Step {
    let signals = LineSignals::from(line);
    let mut next = state;
    let event = if signals.conversion && !state.converting {
        next.converting = true;
        Some(StreamEvent::Converting)
    } else if next.converting {
        None
    } else {
        signals.percent.map(StreamEvent::Downloading)
    };
    Step {
        state: next,
        event,
        destination: signals.destination,
    }
}
