//! 自動表示式の管理
//!
//! 停止を報告するたびに、停止したコンテキストの有効な表示式が評価されます。
//! 表示式はセッションスコープで、切断時にすべて破棄されます。

use azami_expr::Expr;
use azami_session::ContextId;

/// 表示式ID
pub type DisplayId = usize;

/// 自動表示式
#[derive(Debug, Clone)]
pub struct DisplayExpression {
    pub id: DisplayId,
    pub expr: Expr,
    /// ユーザーが入力した式テキスト
    pub text: String,
    pub enabled: bool,
    /// 所属する実行コンテキスト
    pub context: ContextId,
}

/// 表示式レジストリ
#[derive(Debug, Default)]
pub struct DisplayRegistry {
    displays: Vec<DisplayExpression>,
    next_id: DisplayId,
}

impl DisplayRegistry {
    pub fn new() -> Self {
        Self {
            displays: Vec::new(),
            next_id: 1,
        }
    }

    pub fn add(&mut self, expr: Expr, text: &str, context: ContextId) -> DisplayId {
        let id = self.next_id;
        self.next_id += 1;
        self.displays.push(DisplayExpression {
            id,
            expr,
            text: text.to_string(),
            enabled: true,
            context,
        });
        id
    }

    pub fn remove(&mut self, id: DisplayId) -> bool {
        let before = self.displays.len();
        self.displays.retain(|d| d.id != id);
        self.displays.len() != before
    }

    pub fn set_enabled(&mut self, id: DisplayId, enabled: bool) -> bool {
        match self.displays.iter_mut().find(|d| d.id == id) {
            Some(d) => {
                d.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// すべての表示式の有効/無効を切り替える
    pub fn set_all_enabled(&mut self, enabled: bool) {
        for d in &mut self.displays {
            d.enabled = enabled;
        }
    }

    /// 指定コンテキストの有効な表示式
    pub fn enabled_for(&self, context: ContextId) -> Vec<DisplayExpression> {
        self.displays
            .iter()
            .filter(|d| d.enabled && d.context == context)
            .cloned()
            .collect()
    }

    /// ローカル状態を破棄する（切断時）
    pub fn clear_local(&mut self) {
        self.displays.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &DisplayExpression> {
        self.displays.iter()
    }

    pub fn len(&self) -> usize {
        self.displays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.displays.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use azami_expr::parse_expression;

    #[test]
    fn test_enabled_for_filters_by_context() {
        let mut registry = DisplayRegistry::new();
        let a = registry.add(parse_expression("count").unwrap(), "count", 1);
        registry.add(parse_expression("title").unwrap(), "title", 2);

        let visible = registry.enabled_for(1);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, a);

        registry.set_enabled(a, false);
        assert!(registry.enabled_for(1).is_empty());
    }
}
