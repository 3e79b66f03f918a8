use std::path::PathBuf;

use crate::error::{AppError, Result};
use crate::models::ItemFilter;
use crate::paging::Selection;

pub const USAGE: &str = "\
usage: feedflow <command>

  --import <file.opml>            import subscriptions
  --export <file.opml>            export subscriptions
  --refresh                       fetch every feed now
  --watch                         fetch due feeds periodically
  --add <url> [group_id]          subscribe to a feed or site
  --add-group <title> [parent]    create a group
  --move <id> <parent> <index>    move a feed or group
  --delete <id>                   delete a feed or group
  --tree                          print the subscription tree
  --list [feed_id|all] [all|unread|favorite] [--oldest] [pages]
                                  print items, newest first
  --read <id>...                  mark items read
  --repair                        check and rebuild sibling chains";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppAction {
    ImportOpml(PathBuf),
    ExportOpml(PathBuf),
    Refresh,
    Watch,
    AddFeed { url: String, parent_id: i64 },
    AddGroup { title: String, parent_id: i64 },
    MoveFeed { id: i64, parent_id: i64, index: usize },
    DeleteFeed(i64),
    ShowTree,
    ListItems { selection: Selection, pages: usize },
    MarkRead(Vec<i64>),
    RepairChains,
}

/// Maps command line arguments (program name excluded) to an action.
/// `Ok(None)` means print usage.
pub fn parse_args(args: &[String]) -> Result<Option<AppAction>> {
    let Some((command, rest)) = args.split_first() else {
        return Ok(None);
    };

    let action = match command.as_str() {
        "--import" => AppAction::ImportOpml(PathBuf::from(required(rest, 0, "file")?)),
        "--export" => AppAction::ExportOpml(PathBuf::from(required(rest, 0, "file")?)),
        "--refresh" => AppAction::Refresh,
        "--watch" => AppAction::Watch,
        "--add" => AppAction::AddFeed {
            url: required(rest, 0, "url")?.to_string(),
            parent_id: optional_id(rest, 1)?.unwrap_or(0),
        },
        "--add-group" => AppAction::AddGroup {
            title: required(rest, 0, "title")?.to_string(),
            parent_id: optional_id(rest, 1)?.unwrap_or(0),
        },
        "--move" => AppAction::MoveFeed {
            id: number(required(rest, 0, "id")?)?,
            parent_id: number(required(rest, 1, "parent")?)?,
            index: number(required(rest, 2, "index")?)?,
        },
        "--delete" => AppAction::DeleteFeed(number(required(rest, 0, "id")?)?),
        "--tree" => AppAction::ShowTree,
        "--list" => parse_list(rest)?,
        "--read" => {
            let ids = rest.iter().map(|s| number(s)).collect::<Result<Vec<i64>>>()?;
            if ids.is_empty() {
                return Err(usage_error("--read needs at least one item id"));
            }
            AppAction::MarkRead(ids)
        }
        "--repair" => AppAction::RepairChains,
        "-h" | "--help" => return Ok(None),
        other => return Err(usage_error(&format!("unknown command {other}"))),
    };
    Ok(Some(action))
}

fn parse_list(rest: &[String]) -> Result<AppAction> {
    let mut selection = Selection::default();
    let mut pages = 1;
    let mut positional = 0;
    for arg in rest {
        if arg == "--oldest" {
            selection = selection.ascending();
            continue;
        }
        match positional {
            0 if arg == "all" => {}
            0 => selection.feed_ids = [number(arg)?].into_iter().collect(),
            1 => {
                let filter = ItemFilter::parse(arg)
                    .ok_or_else(|| usage_error(&format!("unknown filter {arg}")))?;
                selection = selection.with_filter(filter);
            }
            2 => pages = number(arg)?,
            _ => return Err(usage_error("too many arguments for --list")),
        }
        positional += 1;
    }
    Ok(AppAction::ListItems { selection, pages })
}

fn required<'a>(rest: &'a [String], at: usize, name: &str) -> Result<&'a str> {
    rest.get(at)
        .map(String::as_str)
        .ok_or_else(|| usage_error(&format!("missing <{name}>")))
}

fn optional_id(rest: &[String], at: usize) -> Result<Option<i64>> {
    rest.get(at).map(|s| number(s)).transpose()
}

fn number<T: std::str::FromStr>(s: &str) -> Result<T> {
    s.parse()
        .map_err(|_| usage_error(&format!("expected a number, got {s}")))
}

fn usage_error(message: &str) -> AppError {
    AppError::Config(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn parses_structural_commands() {
        assert_eq!(parse_args(&args("")).unwrap(), None);
        assert_eq!(
            parse_args(&args("--move 4 2 0")).unwrap(),
            Some(AppAction::MoveFeed { id: 4, parent_id: 2, index: 0 })
        );
        assert_eq!(
            parse_args(&args("--add https://x.example 3")).unwrap(),
            Some(AppAction::AddFeed { url: "https://x.example".into(), parent_id: 3 })
        );
        assert_eq!(
            parse_args(&args("--add-group news")).unwrap(),
            Some(AppAction::AddGroup { title: "news".into(), parent_id: 0 })
        );
        assert_eq!(parse_args(&args("--read 1 2")).unwrap(), Some(AppAction::MarkRead(vec![1, 2])));
    }

    #[test]
    fn parses_list_selection() {
        let Some(AppAction::ListItems { selection, pages }) =
            parse_args(&args("--list 7 favorite --oldest 3")).unwrap()
        else {
            panic!("expected a list action");
        };
        assert_eq!(selection.feed_ids.into_iter().collect::<Vec<_>>(), vec![7]);
        assert_eq!(selection.filter, ItemFilter::Favorite);
        assert!(!selection.order_desc);
        assert_eq!(pages, 3);

        assert_eq!(
            parse_args(&args("--list")).unwrap(),
            Some(AppAction::ListItems { selection: Selection::default(), pages: 1 })
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_args(&args("--move 1 x 0")).is_err());
        assert!(parse_args(&args("--delete")).is_err());
        assert!(parse_args(&args("--read")).is_err());
        assert!(parse_args(&args("--list all sometimes")).is_err());
        assert!(parse_args(&args("--frobnicate")).is_err());
    }
}
