//! キャッチポイント管理
//!
//! 最初のキャッチポイントを追加したときにセッションの
//! break-on-caught-exceptions を有効にし、最後の1つを削除したときに
//! 無効へ戻します。

use anyhow::anyhow;

use azami_session::{ContextId, DebuggeeSession, FaultInfo};

/// キャッチポイントID
pub type CatchpointId = usize;

/// キャッチポイント
///
/// `type_name` が `None` ならすべての例外を捕捉します。
#[derive(Debug, Clone)]
pub struct Catchpoint {
    pub id: CatchpointId,
    pub type_name: Option<String>,
}

/// キャッチポイントレジストリ
#[derive(Debug, Default)]
pub struct CatchRegistry {
    catchpoints: Vec<Catchpoint>,
    next_id: CatchpointId,
}

impl CatchRegistry {
    pub fn new() -> Self {
        Self {
            catchpoints: Vec::new(),
            next_id: 1,
        }
    }

    /// キャッチポイントを追加する
    ///
    /// 型名を指定する場合、その名前がデバッギのグローバル検索で見つかる
    /// 必要があります。
    pub fn add(
        &mut self,
        session: &mut dyn DebuggeeSession,
        context: ContextId,
        type_name: Option<&str>,
    ) -> crate::Result<CatchpointId> {
        if let Some(name) = type_name {
            session
                .global(context, name)?
                .ok_or_else(|| anyhow!("type '{}' not found", name))?;
        }

        if self.catchpoints.is_empty() {
            session.break_on_caught(context, true)?;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.catchpoints.push(Catchpoint {
            id,
            type_name: type_name.map(|s| s.to_string()),
        });
        Ok(id)
    }

    /// キャッチポイントを削除する
    pub fn remove(
        &mut self,
        session: &mut dyn DebuggeeSession,
        context: ContextId,
        id: CatchpointId,
    ) -> crate::Result<bool> {
        let at = match self.catchpoints.iter().position(|c| c.id == id) {
            Some(at) => at,
            None => return Ok(false),
        };
        self.catchpoints.remove(at);
        if self.catchpoints.is_empty() {
            session.break_on_caught(context, false)?;
        }
        Ok(true)
    }

    /// 捕捉予定の例外フォルトで停止すべきか
    ///
    /// 型名なしのキャッチポイントはすべてに一致します。型名は `@` 以降を
    /// 取り除いて比較します。
    pub fn matches(&self, fault: &FaultInfo) -> bool {
        let thrown = fault
            .type_name
            .as_deref()
            .map(|t| t.split('@').next().unwrap_or(t));
        self.catchpoints.iter().any(|c| match (&c.type_name, thrown) {
            (None, _) => true,
            (Some(want), Some(got)) => want == got,
            (Some(_), None) => false,
        })
    }

    /// ローカル状態だけを破棄する（切断時）
    pub fn clear_local(&mut self) {
        self.catchpoints.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Catchpoint> {
        self.catchpoints.iter()
    }

    pub fn len(&self) -> usize {
        self.catchpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catchpoints.is_empty()
    }
}
