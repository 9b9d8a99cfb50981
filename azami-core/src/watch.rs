//! ウォッチポイント管理
//!
//! ウォッチポイントはセッションスコープで、切断時にすべて破棄されます。

use azami_expr::ResolvedVariable;
use azami_session::{ContextId, DebuggeeSession, ValueId, WatchHandle, WatchKind};

/// ウォッチポイントID
pub type WatchpointId = usize;

/// ウォッチポイント
#[derive(Debug, Clone)]
pub struct Watchpoint {
    pub id: WatchpointId,
    /// セッションが発行したネイティブハンドル
    pub handle: WatchHandle,
    pub kind: WatchKind,
    /// ユーザーが入力した式テキスト
    pub expr_text: String,
    pub context: ContextId,
    pub parent: ValueId,
    pub member: String,
}

/// set() の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    Created(WatchpointId),
    /// 既存のウォッチポイントの種類を変更した（IDは据え置き）
    Rekinded(WatchpointId),
}

/// ウォッチポイントレジストリ
#[derive(Debug, Default)]
pub struct WatchRegistry {
    watchpoints: Vec<Watchpoint>,
    next_id: WatchpointId,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self {
            watchpoints: Vec::new(),
            next_id: 1,
        }
    }

    /// 解決済み変数に対するウォッチを設定する
    ///
    /// 同じ (値, メンバ) に既にウォッチがある場合は、古いハンドルを解除して
    /// 種類を置き換え、ウォッチポイントIDは据え置きます。
    pub fn set(
        &mut self,
        session: &mut dyn DebuggeeSession,
        context: ContextId,
        variable: &ResolvedVariable,
        kind: WatchKind,
        expr_text: &str,
    ) -> crate::Result<WatchOutcome> {
        if let Some(at) = self
            .watchpoints
            .iter()
            .position(|w| w.parent == variable.parent && w.member == variable.name)
        {
            let old = self.watchpoints[at].handle;
            session.clear_watch(context, old)?;
            let handle = session.set_watch(context, variable.parent, &variable.name, kind)?;
            let w = &mut self.watchpoints[at];
            w.handle = handle;
            w.kind = kind;
            w.expr_text = expr_text.to_string();
            return Ok(WatchOutcome::Rekinded(w.id));
        }

        let handle = session.set_watch(context, variable.parent, &variable.name, kind)?;
        let id = self.next_id;
        self.next_id += 1;
        self.watchpoints.push(Watchpoint {
            id,
            handle,
            kind,
            expr_text: expr_text.to_string(),
            context,
            parent: variable.parent,
            member: variable.name.clone(),
        });
        Ok(WatchOutcome::Created(id))
    }

    /// ウォッチポイントを解除して削除する
    pub fn remove(
        &mut self,
        session: &mut dyn DebuggeeSession,
        id: WatchpointId,
    ) -> crate::Result<bool> {
        let at = match self.watchpoints.iter().position(|w| w.id == id) {
            Some(at) => at,
            None => return Ok(false),
        };
        let w = self.watchpoints.remove(at);
        session.clear_watch(w.context, w.handle)?;
        Ok(true)
    }

    /// ローカル状態だけを破棄する（切断時）
    pub fn clear_local(&mut self) {
        self.watchpoints.clear();
    }

    pub fn get(&self, id: WatchpointId) -> Option<&Watchpoint> {
        self.watchpoints.iter().find(|w| w.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Watchpoint> {
        self.watchpoints.iter()
    }

    pub fn len(&self) -> usize {
        self.watchpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchpoints.is_empty()
    }
}
