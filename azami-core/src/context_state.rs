//! 実行コンテキストごとの可変状態

use std::collections::HashMap;

use azami_session::{ContextId, SuspendReason};

/// コードロード直後の一度きりプロンプトの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptState {
    /// まだ表示していない
    NeverShown,
    /// 一度表示した
    ShownOnce,
    /// 完了（再開済み）
    Done,
}

/// 実行コンテキストごとの保留フラグとプロンプト状態
#[derive(Debug)]
pub struct ContextState {
    pub id: ContextId,
    /// 次のループ周回で再開を発行する
    pub resume_requested: bool,
    /// ユーザーが中断を要求した
    pub halt_requested: bool,
    /// ステップ状態を保ったまま再開する
    pub step_resume: bool,
    pub prompt_state: PromptState,
    /// 最後に観測した中断理由
    pub last_reason: SuspendReason,
}

impl ContextState {
    fn new(id: ContextId) -> Self {
        Self {
            id,
            resume_requested: false,
            halt_requested: false,
            step_resume: false,
            prompt_state: PromptState::Done,
            last_reason: SuspendReason::Unknown,
        }
    }

    /// 保留フラグをすべてクリアする
    pub fn clear_pending(&mut self) {
        self.resume_requested = false;
        self.halt_requested = false;
        self.step_resume = false;
    }
}

/// コンテキスト状態のレジストリ
///
/// プロセス全体のグローバルではなく、SessionControllerが所有します。
/// アクセサは未知のIDに対して遅延的にエントリを作ります。
#[derive(Debug, Default)]
pub struct ContextRegistry {
    states: HashMap<ContextId, ContextState>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 状態を取得する（なければ作る）
    pub fn state(&mut self, id: ContextId) -> &mut ContextState {
        self.states.entry(id).or_insert_with(|| ContextState::new(id))
    }

    pub fn get(&self, id: ContextId) -> Option<&ContextState> {
        self.states.get(&id)
    }

    pub fn remove(&mut self, id: ContextId) {
        self.states.remove(&id);
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContextState> {
        self.states.values()
    }
}
