use crate::event_models::*;
use memchr::memchr;

// Line markers as they appear in the game log. The grammar is fixed and
// positional, so plain substring scans beat a regex table here.
const BAG_MODIFY: &str = "BagMgr@:Modfy BagItem";
const BAG_INIT: &str = "BagMgr@:Init BagItem";
const BAG_REMOVE: &str = "BagMgr@:Remove BagItem";
const ITEM_CHANGE: &str = "ItemChange@ ProtoName=";
const LEVEL_OPEN: &str = "SceneLevelMgr@ OpenMainWorld END! InMainLevelPath =";
const LEVEL_ENTER: &str = "LevelMgr@ LevelUid, LevelType, LevelId =";
const ROLE_MGR: &str = "RoleMgr@ ";
const XCHG_SEND: &str = "----Socket SendMessage STT----XchgSearchPrice----SynId =";
const XCHG_RECV: &str = "----Socket RecvMessage STT----XchgSearchPrice----SynId =";
const XCHG_SEND_END: &str = "----Socket SendMessage End----";
const XCHG_RECV_END: &str = "----Socket RecvMessage End----";

/// Parse a single log line into a typed event.
///
/// Total and pure: unrecognized lines yield `None`, never an error.
pub fn parse_line(line: &str) -> Option<LogEvent> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return None;
    }

    if let Some(rest) = find_after(line, BAG_MODIFY) {
        return parse_bag_fields(rest).map(|(slot, type_id, num)| LogEvent::BagModify {
            slot,
            type_id,
            num,
        });
    }

    if let Some(rest) = find_after(line, BAG_INIT) {
        return parse_bag_fields(rest).map(|(slot, type_id, num)| LogEvent::BagInit {
            slot,
            type_id,
            num,
        });
    }

    if let Some(rest) = find_after(line, BAG_REMOVE) {
        let page_id = num_field(rest, "PageId")?;
        let slot_id = num_field(rest, "SlotId")?;
        return Some(LogEvent::BagRemove {
            slot: SlotKey::new(page_id, slot_id),
        });
    }

    if let Some(rest) = find_after(line, ITEM_CHANGE) {
        return parse_context_marker(rest);
    }

    if let Some(rest) = find_after(line, LEVEL_OPEN) {
        let path = rest.trim();
        if path.is_empty() {
            return None;
        }
        return Some(LogEvent::LevelOpen {
            path: path.to_string(),
        });
    }

    if let Some(rest) = find_after(line, LEVEL_ENTER) {
        let mut nums = rest.split_ascii_whitespace();
        let level_uid = nums.next()?.parse().ok()?;
        let level_type = nums.next()?.parse().ok()?;
        let level_id = nums.next()?.parse().ok()?;
        return Some(LogEvent::LevelEnter {
            level_uid,
            level_type,
            level_id,
        });
    }

    if let Some(rest) = find_after(line, ROLE_MGR) {
        return parse_player_field(rest);
    }

    parse_exchange_line(line).map(LogEvent::Exchange)
}

/// Recognize one line of an exchange socket message.
fn parse_exchange_line(line: &str) -> Option<ExchangeFragment> {
    if let Some(rest) = find_after(line, XCHG_SEND) {
        return Some(ExchangeFragment::SearchRequest {
            syn_id: rest.trim().parse().ok()?,
        });
    }
    if let Some(rest) = find_after(line, XCHG_RECV) {
        return Some(ExchangeFragment::SearchResponse {
            syn_id: rest.trim().parse().ok()?,
        });
    }
    if line.contains(XCHG_SEND_END) || line.contains(XCHG_RECV_END) {
        return Some(ExchangeFragment::End);
    }

    // Body lines: `+refer [id]`, `+prices+K+currency [id]`, `+unitPrices+K [p]`,
    // continuation `+K [p]`. Only lines starting a `+` tree node qualify.
    let trimmed = line.trim_start_matches([' ', '\t', '|']);
    if !trimmed.starts_with('+') {
        return None;
    }

    if let Some(rest) = find_after(trimmed, "+refer ") {
        return Some(ExchangeFragment::Refer {
            type_id: bracketed_i64(rest)?,
        });
    }
    if trimmed.starts_with("+prices+") {
        if let Some(rest) = find_after(trimmed, "+currency ") {
            return Some(ExchangeFragment::Currency {
                type_id: bracketed_i64(rest)?,
            });
        }
        return None;
    }
    if let Some(rest) = find_after(trimmed, "+unitPrices+") {
        let after_index = skip_digits(rest)?;
        return Some(ExchangeFragment::UnitPrice {
            price: bracketed_f64(after_index)?,
        });
    }
    // Continuation row: `+K [p]` with nothing but an index before the bracket
    let after_index = skip_digits(&trimmed[1..])?;
    if after_index.trim_start().starts_with('[') {
        return Some(ExchangeFragment::UnitPrice {
            price: bracketed_f64(after_index)?,
        });
    }

    None
}

fn parse_context_marker(rest: &str) -> Option<LogEvent> {
    // rest is `<proto_name> start` or `<proto_name> end`
    let mut parts = rest.split_ascii_whitespace();
    let proto_name = parts.next()?.to_string();
    match parts.next()? {
        "start" => Some(LogEvent::ContextBegin { proto_name }),
        "end" => Some(LogEvent::ContextEnd { proto_name }),
        _ => None,
    }
}

fn parse_player_field(rest: &str) -> Option<LogEvent> {
    let eq = rest.find('=')?;
    let key = match rest[..eq].trim() {
        "RoleName" => PlayerFieldKey::RoleName,
        "RoleId" => PlayerFieldKey::RoleId,
        "SeasonId" => PlayerFieldKey::SeasonId,
        _ => return None,
    };
    let value = rest[eq + 1..].trim();
    if value.is_empty() {
        return None;
    }
    Some(LogEvent::PlayerField {
        key,
        value: value.to_string(),
    })
}

fn parse_bag_fields(rest: &str) -> Option<(SlotKey, i64, i64)> {
    let page_id = num_field(rest, "PageId")?;
    let slot_id = num_field(rest, "SlotId")?;
    let type_id = num_field(rest, "ConfigBaseId")?;
    let num = num_field(rest, "Num")?;
    Some((SlotKey::new(page_id, slot_id), type_id, num))
}

/// Locate `marker` in `line` and return the text after it.
fn find_after<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.find(marker).map(|pos| &line[pos + marker.len()..])
}

/// Extract the integer following `<name> = ` (whitespace around `=` is lax).
fn num_field(text: &str, name: &str) -> Option<i64> {
    let rest = find_after(text, name)?;
    let rest = rest.trim_start();
    let rest = rest.strip_prefix('=')?.trim_start();
    let end = rest
        .as_bytes()
        .iter()
        .position(|b| !b.is_ascii_digit() && *b != b'-')
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}

/// Parse `[12345]` from the start of `text` (leading whitespace allowed).
fn bracketed_i64(text: &str) -> Option<i64> {
    let bytes = text.as_bytes();
    let open = memchr(b'[', bytes)?;
    let close = memchr(b']', bytes)?;
    text.get(open + 1..close)?.parse().ok()
}

fn bracketed_f64(text: &str) -> Option<f64> {
    let bytes = text.as_bytes();
    let open = memchr(b'[', bytes)?;
    let close = memchr(b']', bytes)?;
    text.get(open + 1..close)?.parse().ok()
}

/// Skip a run of ASCII digits, returning the remainder. None if no digits.
fn skip_digits(text: &str) -> Option<&str> {
    let n = text
        .as_bytes()
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if n == 0 { None } else { Some(&text[n..]) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bag_modify() {
        let line = "GameLog: Display: [Game] BagMgr@:Modfy BagItem PageId = 102 SlotId = 0 ConfigBaseId = 100300 Num = 671";
        assert_eq!(
            parse_line(line),
            Some(LogEvent::BagModify {
                slot: SlotKey::new(102, 0),
                type_id: 100300,
                num: 671,
            })
        );
    }

    #[test]
    fn test_parse_bag_init_distinct_from_modify() {
        let line = "GameLog: Display: [Game] BagMgr@:Init BagItem PageId = 103 SlotId = 5 ConfigBaseId = 210041 Num = 3";
        assert_eq!(
            parse_line(line),
            Some(LogEvent::BagInit {
                slot: SlotKey::new(103, 5),
                type_id: 210041,
                num: 3,
            })
        );
    }

    #[test]
    fn test_parse_bag_remove_has_no_type_id() {
        let line = "GameLog: Display: [Game] BagMgr@:Remove BagItem PageId = 103 SlotId = 39";
        assert_eq!(
            parse_line(line),
            Some(LogEvent::BagRemove {
                slot: SlotKey::new(103, 39),
            })
        );
    }

    #[test]
    fn test_parse_context_markers() {
        assert_eq!(
            parse_line("GameLog: Display: [Game] ItemChange@ ProtoName=PickItems start"),
            Some(LogEvent::ContextBegin {
                proto_name: "PickItems".to_string()
            })
        );
        assert_eq!(
            parse_line("GameLog: Display: [Game] ItemChange@ ProtoName=PickItems end"),
            Some(LogEvent::ContextEnd {
                proto_name: "PickItems".to_string()
            })
        );
    }

    #[test]
    fn test_parse_level_open() {
        let line = "SceneLevelMgr@ OpenMainWorld END! InMainLevelPath = /Game/Art/Maps/01SD/XZ_YuJinZhiXiBiNanSuo200/XZ_YuJinZhiXiBiNanSuo200_P";
        match parse_line(line) {
            Some(LogEvent::LevelOpen { path }) => {
                assert!(path.starts_with("/Game/Art/Maps/01SD/"));
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_parse_level_enter_triplet() {
        let line =
            "GameLog: Display: [Game] LevelMgr@ LevelUid, LevelType, LevelId = 1061006 3 4606";
        assert_eq!(
            parse_line(line),
            Some(LogEvent::LevelEnter {
                level_uid: 1061006,
                level_type: 3,
                level_id: 4606,
            })
        );
    }

    #[test]
    fn test_parse_player_fields() {
        assert_eq!(
            parse_line("GameLog: Display: [Game] RoleMgr@ RoleName = Kaelyn"),
            Some(LogEvent::PlayerField {
                key: PlayerFieldKey::RoleName,
                value: "Kaelyn".to_string(),
            })
        );
        assert_eq!(
            parse_line("GameLog: Display: [Game] RoleMgr@ SeasonId = 10"),
            Some(LogEvent::PlayerField {
                key: PlayerFieldKey::SeasonId,
                value: "10".to_string(),
            })
        );
    }

    #[test]
    fn test_parse_exchange_fragments() {
        assert_eq!(
            parse_line("----Socket SendMessage STT----XchgSearchPrice----SynId = 12"),
            Some(LogEvent::Exchange(ExchangeFragment::SearchRequest {
                syn_id: 12
            }))
        );
        assert_eq!(
            parse_line("----Socket RecvMessage STT----XchgSearchPrice----SynId = 12"),
            Some(LogEvent::Exchange(ExchangeFragment::SearchResponse {
                syn_id: 12
            }))
        );
        assert_eq!(
            parse_line("----Socket RecvMessage End----"),
            Some(LogEvent::Exchange(ExchangeFragment::End))
        );
        assert_eq!(
            parse_line("    +refer [100210]"),
            Some(LogEvent::Exchange(ExchangeFragment::Refer {
                type_id: 100210
            }))
        );
        assert_eq!(
            parse_line("  +prices+0+currency [100300]"),
            Some(LogEvent::Exchange(ExchangeFragment::Currency {
                type_id: 100300
            }))
        );
        assert_eq!(
            parse_line("  +unitPrices+0 [0.10]"),
            Some(LogEvent::Exchange(ExchangeFragment::UnitPrice {
                price: 0.10
            }))
        );
        assert_eq!(
            parse_line("  +1 [0.12]"),
            Some(LogEvent::Exchange(ExchangeFragment::UnitPrice {
                price: 0.12
            }))
        );
    }

    #[test]
    fn test_unrecognized_lines_are_dropped() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("LogTemp: Warning: something unrelated"), None);
        assert_eq!(
            parse_line("GameLog: Display: [Game] BagMgr@:Modfy BagItem PageId = x"),
            None
        );
    }

    #[test]
    fn test_parse_is_deterministic() {
        let line = "GameLog: Display: [Game] BagMgr@:Modfy BagItem PageId = 102 SlotId = 3 ConfigBaseId = 100500 Num = 9";
        assert_eq!(parse_line(line), parse_line(line));
    }
}
