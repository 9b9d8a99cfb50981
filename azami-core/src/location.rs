//! LocationSet 値型

use azami_session::{ContextId, Location, ModuleId};

/// 「同じ」論理的な場所を表す1つ以上の具体的なブレークポイント対象
///
/// 挿入順を保ち、重複を取り込みません。先頭のLocationが表示・再アームの
/// テンプレートとして使われます。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationSet {
    locations: Vec<Location>,
}

impl LocationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locationを追加する。既に含まれていればfalseを返す
    pub fn add(&mut self, location: Location) -> bool {
        if self.locations.contains(&location) {
            return false;
        }
        self.locations.push(location);
        true
    }

    /// 先頭のLocation（テンプレート）
    pub fn first(&self) -> Option<&Location> {
        self.locations.first()
    }

    /// 最後に追加されたLocation
    pub fn last(&self) -> Option<&Location> {
        self.locations.last()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Location> {
        self.locations.iter()
    }

    pub fn contains(&self, location: &Location) -> bool {
        self.locations.contains(location)
    }

    /// (モジュール, 行) がどれかのLocationと一致するか
    pub fn covers(&self, module: ModuleId, line: u32) -> bool {
        self.locations
            .iter()
            .any(|l| l.module == module && l.line == line)
    }

    /// (モジュール, 行, コンテキスト) がどれかのLocationと一致するか
    pub fn covers_in(&self, module: ModuleId, line: u32, context: ContextId) -> bool {
        self.locations
            .iter()
            .any(|l| l.module == module && l.line == line && l.context == context)
    }

    /// 指定コンテキストのLocationを持つか
    pub fn has_context(&self, context: ContextId) -> bool {
        self.locations.iter().any(|l| l.context == context)
    }

    pub fn clear(&mut self) {
        self.locations.clear();
    }
}

impl FromIterator<Location> for LocationSet {
    fn from_iter<T: IntoIterator<Item = Location>>(iter: T) -> Self {
        let mut set = LocationSet::new();
        for location in iter {
            set.add(location);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_deduplicates() {
        let mut set = LocationSet::new();
        let l = Location::new(7, 42, 1);
        assert!(set.add(l));
        assert!(!set.add(l));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_covers_ignores_context() {
        let mut set = LocationSet::new();
        set.add(Location::new(7, 42, 1));
        assert!(set.covers(7, 42));
        assert!(!set.covers(7, 43));
        assert!(set.covers_in(7, 42, 1));
        assert!(!set.covers_in(7, 42, 2));
    }
}
