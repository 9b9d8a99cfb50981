//! 位置引数のパース

use anyhow::{anyhow, bail};

use azami_session::ModuleId;

use crate::unit_cache::CodeUnitCache;

/// 位置引数の解決結果
///
/// 構文エラーは`Err`、名前がまだ見つからない・曖昧といった「期待される」
/// 結果はバリアントで表します。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLocation {
    /// 1つのモジュールと行に解決できた
    Resolved { module: ModuleId, line: u32 },
    /// 一致する名前がない（後でロードされるかもしれない）
    NoMatch,
    /// 同程度に良い候補が複数ある
    Ambiguous { candidates: Vec<ModuleId> },
}

/// ユーザーが入力した位置式をパースする
///
/// サポートする形式:
/// - `42` — 現在のリスティングモジュール内の行
/// - `#7:42` — モジュールIDと行
/// - `name:42` — 名前パターンと行（`*`ワイルドカード、ドットパス可）
pub fn parse_location_arg(
    cache: &CodeUnitCache,
    current_module: Option<ModuleId>,
    arg: &str,
) -> anyhow::Result<ParsedLocation> {
    let arg = arg.trim();
    if arg.is_empty() {
        bail!("empty breakpoint location");
    }

    // 素の行番号は現在のモジュールを使う
    if let Ok(line) = arg.parse::<u32>() {
        let module =
            current_module.ok_or_else(|| anyhow!("no current module for bare line number"))?;
        return Ok(ParsedLocation::Resolved { module, line });
    }

    let (name_part, line_part) = match arg.rsplit_once(':') {
        Some(parts) => parts,
        None => bail!("breakpoint location '{arg}' must be <module>:<line> or a line number"),
    };
    let line: u32 = line_part
        .parse()
        .map_err(|_| anyhow!("invalid line number '{line_part}'"))?;
    if line == 0 {
        bail!("line numbers start at 1");
    }

    // #N:line はIDを直接指定する
    if let Some(id_part) = name_part.strip_prefix('#') {
        let module: ModuleId = id_part
            .parse()
            .map_err(|_| anyhow!("invalid module id '{id_part}'"))?;
        return Ok(match cache.resolve(module) {
            Ok(_) => ParsedLocation::Resolved { module, line },
            Err(_) => ParsedLocation::NoMatch,
        });
    }

    let hits = cache.find_by_pattern(name_part);
    Ok(match hits.len() {
        0 => ParsedLocation::NoMatch,
        1 => ParsedLocation::Resolved {
            module: hits[0].id,
            line,
        },
        _ => ParsedLocation::Ambiguous {
            candidates: hits.iter().map(|m| m.id).collect(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use azami_session::loopback::{LoopbackSession, ROOT_CONTEXT};
    use azami_session::Module;

    fn session() -> LoopbackSession {
        let mut s = LoopbackSession::new();
        s.load_unit(
            ROOT_CONTEXT,
            "main.unit",
            vec![
                Module {
                    id: 1,
                    name: "Main.ext".to_string(),
                    package: "app".to_string(),
                    line_count: 100,
                    raw_identity: "app.Main".to_string(),
                },
                Module {
                    id: 2,
                    name: "Timer.ext".to_string(),
                    package: "app.util".to_string(),
                    line_count: 50,
                    raw_identity: "app.util.Timer".to_string(),
                },
                Module {
                    id: 3,
                    name: "Timeout.ext".to_string(),
                    package: "app.util".to_string(),
                    line_count: 40,
                    raw_identity: "app.util.Timeout".to_string(),
                },
            ],
        );
        s
    }

    fn cache() -> CodeUnitCache {
        let s = session();
        let mut cache = CodeUnitCache::new();
        cache.refresh(&s).unwrap();
        cache
    }

    #[test]
    fn test_bare_line_uses_current_module() {
        let cache = cache();
        assert_eq!(
            parse_location_arg(&cache, Some(1), "42").unwrap(),
            ParsedLocation::Resolved { module: 1, line: 42 }
        );
        assert!(parse_location_arg(&cache, None, "42").is_err());
    }

    #[test]
    fn test_module_id_form() {
        let cache = cache();
        assert_eq!(
            parse_location_arg(&cache, None, "#2:7").unwrap(),
            ParsedLocation::Resolved { module: 2, line: 7 }
        );
        assert_eq!(
            parse_location_arg(&cache, None, "#99:7").unwrap(),
            ParsedLocation::NoMatch
        );
    }

    #[test]
    fn test_name_pattern_form() {
        let cache = cache();
        assert_eq!(
            parse_location_arg(&cache, None, "Timer.ext:12").unwrap(),
            ParsedLocation::Resolved { module: 2, line: 12 }
        );
        assert_eq!(
            parse_location_arg(&cache, None, "Nothere.ext:12").unwrap(),
            ParsedLocation::NoMatch
        );
    }

    #[test]
    fn test_ambiguous_pattern_lists_candidates() {
        let cache = cache();
        match parse_location_arg(&cache, None, "Tim*:5").unwrap() {
            ParsedLocation::Ambiguous { candidates } => {
                assert_eq!(candidates, vec![3, 2]);
            }
            other => panic!("expected Ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_syntax_is_an_error() {
        let cache = cache();
        assert!(parse_location_arg(&cache, None, "Timer.ext:").is_err());
        assert!(parse_location_arg(&cache, None, "Timer.ext:zero").is_err());
        assert!(parse_location_arg(&cache, None, "Timer.ext:0").is_err());
        assert!(parse_location_arg(&cache, None, "justaname").is_err());
    }
}
