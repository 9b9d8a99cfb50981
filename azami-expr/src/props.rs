//! `$` 擬似変数のバッキングストア

use std::collections::HashMap;

use azami_session::RemoteValue;

/// セッションプロパティと評価履歴
///
/// `$name` は名前付きの整数プロパティ、`$N` はN番目の評価結果、
/// `$` は直前の評価結果を指します。どれもリモート参照を伴わない
/// ローカルな擬似変数です。
#[derive(Debug, Default)]
pub struct PropertyStore {
    props: HashMap<String, i64>,
    history: Vec<RemoteValue>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 名前付きプロパティを設定する（`$`プレフィックスなしの名前で）
    pub fn put(&mut self, name: &str, value: i64) {
        self.props.insert(name.to_string(), value);
    }

    /// 名前付きプロパティを取得する
    pub fn get(&self, name: &str) -> Option<i64> {
        self.props.get(name).copied()
    }

    /// 評価結果を履歴に積み、その履歴番号を返す（1始まり）
    pub fn push_history(&mut self, value: RemoteValue) -> usize {
        self.history.push(value);
        self.history.len()
    }

    /// N番目の評価結果（1始まり）
    pub fn history(&self, n: usize) -> Option<&RemoteValue> {
        if n == 0 {
            return None;
        }
        self.history.get(n - 1)
    }

    /// 直前の評価結果
    pub fn last(&self) -> Option<&RemoteValue> {
        self.history.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_properties() {
        let mut store = PropertyStore::new();
        store.put("listline", 42);
        assert_eq!(store.get("listline"), Some(42));
        assert_eq!(store.get("missing"), None);
    }

    #[test]
    fn test_history_is_one_based() {
        let mut store = PropertyStore::new();
        let n = store.push_history(RemoteValue::primitive("int", "1"));
        assert_eq!(n, 1);
        store.push_history(RemoteValue::primitive("int", "2"));

        assert_eq!(store.history(1).unwrap().repr, "1");
        assert_eq!(store.history(2).unwrap().repr, "2");
        assert!(store.history(0).is_none());
        assert!(store.history(3).is_none());
        assert_eq!(store.last().unwrap().repr, "2");
    }
}
