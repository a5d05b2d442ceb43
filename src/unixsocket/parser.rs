use crate::commands::{ListFilter, Request};
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag_no_case},
    character::complete::{not_line_ending, space1},
    combinator::{all_consuming, map, opt, value},
    sequence::{preceded, separated_pair, tuple},
    Finish, IResult,
};
use std::str::FromStr;

fn token(input: &str) -> IResult<&str, &str> {
    is_not(" \t\r\n")(input)
}

fn add_cmd(input: &str) -> IResult<&str, Request> {
    let p = separated_pair(tag_no_case("add"), space1, token);
    map(p, |(_, url): (_, &str)| Request::Add(url.to_string()))(input)
}

fn start_cmd(input: &str) -> IResult<&str, Request> {
    let p = tuple((
        tag_no_case("start"),
        space1,
        token,
        opt(preceded(space1, not_line_ending)),
    ));
    map(p, |(_, _, url, title): (_, _, &str, Option<&str>)| {
        let title = title.map(str::trim).filter(|t| !t.is_empty());
        Request::Start {
            url: url.to_string(),
            title: title.map(String::from),
        }
    })(input)
}

fn info_cmd(input: &str) -> IResult<&str, Request> {
    let p = separated_pair(tag_no_case("info"), space1, token);
    map(p, |(_, url): (_, &str)| Request::Info(url.to_string()))(input)
}

fn cancel_cmd(input: &str) -> IResult<&str, Request> {
    let p = separated_pair(tag_no_case("cancel"), space1, token);
    map(p, |(_, id)| Request::Cancel(id.into()))(input)
}

fn delete_cmd(input: &str) -> IResult<&str, Request> {
    let p = separated_pair(tag_no_case("delete"), space1, token);
    map(p, |(_, id)| Request::Delete(id.into()))(input)
}

fn clear_cmd(input: &str) -> IResult<&str, Request> {
    value(Request::Clear, tag_no_case("clear"))(input)
}

fn list_filter(input: &str) -> IResult<&str, ListFilter> {
    alt((
        value(ListFilter::All, tag_no_case("all")),
        value(ListFilter::Complete, tag_no_case("complete")),
        value(ListFilter::Error, tag_no_case("error")),
        value(ListFilter::Active, tag_no_case("active")),
    ))(input)
}

fn list_cmd(input: &str) -> IResult<&str, Request> {
    let p = preceded(tag_no_case("list"), opt(preceded(space1, list_filter)));
    map(p, |filter| Request::List(filter.unwrap_or_default()))(input)
}

fn settings_cmd(input: &str) -> IResult<&str, Request> {
    value(Request::Settings, tag_no_case("settings"))(input)
}

fn set_cmd(input: &str) -> IResult<&str, Request> {
    let p = tuple((tag_no_case("set"), space1, token, space1, not_line_ending));
    map(p, |(_, _, key, _, value): (_, _, &str, _, &str)| Request::Set {
        key: key.to_string(),
        value: value.trim().to_string(),
    })(input)
}

fn watch_cmd(input: &str) -> IResult<&str, Request> {
    value(Request::Watch, tag_no_case("watch"))(input)
}

impl FromStr for Request {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // the whole line must be one command, so "clearance" is not "clear"
        let mut cmds = all_consuming(alt((
            add_cmd,
            start_cmd,
            info_cmd,
            cancel_cmd,
            delete_cmd,
            clear_cmd,
            list_cmd,
            settings_cmd,
            set_cmd,
            watch_cmd,
        )));
        if let Ok((_, cmd)) = cmds(s.trim()).finish() {
            Ok(cmd)
        } else {
            Err(())
        }
    }
}

#[cfg(test)]
mod checks {
    use super::*;
    #[test]
    fn check_add() {
        let input = "add https://youtu.be/abc\n";
        let cmd = Request::Add("https://youtu.be/abc".into());
        assert_eq!(input.parse(), Ok(cmd));
    }
    #[test]
    fn check_start_without_title() {
        let input = "START https://vimeo.com/1\n";
        let cmd = Request::Start {
            url: "https://vimeo.com/1".into(),
            title: None,
        };
        assert_eq!(input.parse(), Ok(cmd));
        let input = "start https://vimeo.com/1   \n";
        let cmd = Request::Start {
            url: "https://vimeo.com/1".into(),
            title: None,
        };
        assert_eq!(input.parse(), Ok(cmd));
    }
    #[test]
    fn check_start_with_title() {
        let input = "start https://vimeo.com/1 A Film: Part 2\n";
        let cmd = Request::Start {
            url: "https://vimeo.com/1".into(),
            title: Some("A Film: Part 2".into()),
        };
        assert_eq!(input.parse(), Ok(cmd));
    }
    #[test]
    fn check_ids() {
        assert_eq!("cancel 1700000000000".parse(), Ok(Request::Cancel("1700000000000".into())));
        assert_eq!("Delete 42\n".parse(), Ok(Request::Delete("42".into())));
        assert_eq!("info https://x.com/a".parse(), Ok(Request::Info("https://x.com/a".into())));
    }
    #[test]
    fn check_list() {
        assert_eq!("list".parse(), Ok(Request::List(ListFilter::All)));
        assert_eq!("LIST error\n".parse(), Ok(Request::List(ListFilter::Error)));
        assert_eq!("list complete".parse(), Ok(Request::List(ListFilter::Complete)));
        assert_eq!("list active".parse(), Ok(Request::List(ListFilter::Active)));
    }
    #[test]
    fn check_settings_and_set() {
        assert_eq!("settings\n".parse(), Ok(Request::Settings));
        let cmd = Request::Set {
            key: "outputDir".into(),
            value: "/home/me/My Music".into(),
        };
        assert_eq!("set outputDir /home/me/My Music\n".parse(), Ok(cmd));
    }
    #[test]
    fn check_simple() {
        assert_eq!("clear".parse(), Ok(Request::Clear));
        assert_eq!("  Watch\n".parse(), Ok(Request::Watch));
    }
    #[test]
    fn check_rejects() {
        assert_eq!("".parse::<Request>(), Err(()));
        assert_eq!("add".parse::<Request>(), Err(()));
        assert_eq!("cancel\n".parse::<Request>(), Err(()));
        assert_eq!("set format".parse::<Request>(), Err(()));
        assert_eq!("fly away".parse::<Request>(), Err(()));
    }
    #[test]
    fn check_rejects_trailing_words() {
        assert_eq!("clearance".parse::<Request>(), Err(()));
        assert_eq!("watchful\n".parse::<Request>(), Err(()));
        assert_eq!("settingsX".parse::<Request>(), Err(()));
        assert_eq!("list bogus".parse::<Request>(), Err(()));
        assert_eq!("cancel 5 6".parse::<Request>(), Err(()));
        assert_eq!("add https://a.example/1 https://b.example/2".parse::<Request>(), Err(()));
        assert_eq!("clear  \n".parse(), Ok(Request::Clear));
    }
}
