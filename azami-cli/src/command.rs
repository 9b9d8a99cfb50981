//! デバッガコマンド

/// デバッガコマンド
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// ブレークポイントを設定
    Break(String),
    /// ブレークポイントを削除
    Delete(usize),
    /// ブレークポイントを有効化
    Enable(usize),
    /// 一度ヒットしたら自動で無効化
    EnableOnce(usize),
    /// 一度ヒットしたら自動で削除
    EnableDelete(usize),
    /// ブレークポイントを無効化
    Disable(usize),
    /// 条件式を設定（Noneで解除）
    Condition(usize, Option<String>),
    /// 実行継続
    Continue,
    /// ステップイン
    Step,
    /// ステップオーバー
    Next,
    /// 現在の関数から抜けるまで実行
    Finish,
    /// 実行中のコンテキストを中断
    Halt,
    /// 式を評価して表示
    Print(String),
    /// 式へ代入
    Set { target: String, value: String },
    /// 書き込みウォッチポイントを設定
    Watch(String),
    /// 読み取りウォッチポイントを設定
    RWatch(String),
    /// 読み書きウォッチポイントを設定
    AWatch(String),
    /// ウォッチポイントを解除
    Unwatch(usize),
    /// キャッチポイントを追加（Noneですべての例外）
    Catch(Option<String>),
    /// キャッチポイントを削除
    Uncatch(usize),
    /// 自動表示式を追加
    Display(String),
    /// 自動表示式を削除
    Undisplay(usize),
    /// ブレークポイント一覧
    InfoBreakpoints,
    /// モジュール一覧（パターン指定可）
    InfoModules(Option<String>),
    /// コードユニットフィルタを設定（Noneで解除）
    Filter(Option<String>),
    /// スタックフレームを選択
    Frame(u32),
    /// ヘルプ表示
    Help,
    /// 終了
    Quit,
}

impl Command {
    /// コマンド文字列をパースする
    pub fn parse(input: &str) -> Option<Self> {
        let parts: Vec<&str> = input.trim().split_whitespace().collect();
        if parts.is_empty() {
            return None;
        }

        let rest = |from: usize| parts[from..].join(" ");
        let id_at = |at: usize| parts.get(at).and_then(|s| s.parse::<usize>().ok());

        match parts[0] {
            "break" | "b" => {
                if parts.len() > 1 {
                    Some(Command::Break(rest(1)))
                } else {
                    None
                }
            }
            "delete" | "d" => id_at(1).map(Command::Delete),
            "enable" => match parts.get(1) {
                Some(&"once") => id_at(2).map(Command::EnableOnce),
                Some(&"delete") => id_at(2).map(Command::EnableDelete),
                Some(_) => id_at(1).map(Command::Enable),
                None => None,
            },
            "disable" => id_at(1).map(Command::Disable),
            "condition" | "cond" => {
                let id = id_at(1)?;
                if parts.len() > 2 {
                    Some(Command::Condition(id, Some(rest(2))))
                } else {
                    Some(Command::Condition(id, None))
                }
            }
            "continue" | "c" => Some(Command::Continue),
            "step" | "s" => Some(Command::Step),
            "next" | "n" => Some(Command::Next),
            "finish" | "f" => Some(Command::Finish),
            "halt" | "stop" => Some(Command::Halt),
            "print" | "p" => {
                if parts.len() > 1 {
                    Some(Command::Print(rest(1)))
                } else {
                    None
                }
            }
            "set" => {
                // set target = value
                let text = rest(1);
                let (target, value) = text.split_once('=')?;
                Some(Command::Set {
                    target: target.trim().to_string(),
                    value: value.trim().to_string(),
                })
            }
            "watch" => {
                if parts.len() > 1 {
                    Some(Command::Watch(rest(1)))
                } else {
                    None
                }
            }
            "rwatch" => {
                if parts.len() > 1 {
                    Some(Command::RWatch(rest(1)))
                } else {
                    None
                }
            }
            "awatch" => {
                if parts.len() > 1 {
                    Some(Command::AWatch(rest(1)))
                } else {
                    None
                }
            }
            "unwatch" => id_at(1).map(Command::Unwatch),
            "catch" => match parts.get(1) {
                Some(&"*") => Some(Command::Catch(None)),
                Some(name) => Some(Command::Catch(Some(name.to_string()))),
                None => None,
            },
            "uncatch" => id_at(1).map(Command::Uncatch),
            "display" => {
                if parts.len() > 1 {
                    Some(Command::Display(rest(1)))
                } else {
                    None
                }
            }
            "undisplay" => id_at(1).map(Command::Undisplay),
            "info" | "i" => match parts.get(1) {
                Some(&"breakpoints") | Some(&"break") | Some(&"b") => {
                    Some(Command::InfoBreakpoints)
                }
                Some(&"modules") | Some(&"files") => {
                    Some(Command::InfoModules(parts.get(2).map(|s| s.to_string())))
                }
                _ => None,
            },
            "filter" => match parts.get(1) {
                Some(&"off") => Some(Command::Filter(None)),
                Some(name) => Some(Command::Filter(Some(name.to_string()))),
                None => None,
            },
            "frame" => parts
                .get(1)
                .and_then(|s| s.parse::<u32>().ok())
                .map(Command::Frame),
            "help" | "h" | "?" => Some(Command::Help),
            "quit" | "q" | "exit" => Some(Command::Quit),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            Command::parse("break Timer.ext:42"),
            Some(Command::Break("Timer.ext:42".to_string()))
        );
        assert_eq!(Command::parse("c"), Some(Command::Continue));
        assert_eq!(Command::parse("delete 3"), Some(Command::Delete(3)));
        assert_eq!(Command::parse("enable once 2"), Some(Command::EnableOnce(2)));
        assert_eq!(Command::parse("info break"), Some(Command::InfoBreakpoints));
        assert_eq!(Command::parse("catch *"), Some(Command::Catch(None)));
        assert_eq!(Command::parse("quit"), Some(Command::Quit));
    }

    #[test]
    fn test_parse_condition_with_and_without_expression() {
        assert_eq!(
            Command::parse("condition 2 count == 3"),
            Some(Command::Condition(2, Some("count == 3".to_string())))
        );
        assert_eq!(Command::parse("condition 2"), Some(Command::Condition(2, None)));
    }

    #[test]
    fn test_parse_set_splits_on_equals() {
        assert_eq!(
            Command::parse("set counter.value = 9"),
            Some(Command::Set {
                target: "counter.value".to_string(),
                value: "9".to_string(),
            })
        );
    }

    #[test]
    fn test_parse_rejects_incomplete_input() {
        assert_eq!(Command::parse(""), None);
        assert_eq!(Command::parse("break"), None);
        assert_eq!(Command::parse("delete x"), None);
        assert_eq!(Command::parse("bogus"), None);
    }
}
