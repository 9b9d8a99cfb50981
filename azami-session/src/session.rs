//! デバッギセッションのインターフェース

use crate::event::{DebugEvent, FaultInfo, SuspendReason};
use crate::unit::{CodeUnit, ContextId, Location, ModuleId};
use crate::value::{RemoteValue, RemoteVariable, ValueId};
use crate::Result;

/// 値レベルウォッチの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    Read,
    Write,
    ReadWrite,
}

/// セッションが発行するウォッチのネイティブハンドル
pub type WatchHandle = u64;

/// デバッギセッション
///
/// リモートのデバッギに対する操作の境界です。実装はワイヤトランスポートを
/// 内包しますが、デバッガ自身の状態には一切触れません。
///
/// アーム/ディスアームの要求は常に「現在アクティブな実行コンテキスト」を
/// 対象とし、そのコンテキストは中断中でなければなりません。別コンテキストの
/// Locationを操作する場合、呼び出し側がアクティブコンテキストの切り替えと
/// 中断/再開を調停します。
///
/// 明示的な `suspend` の完了は `is_suspended` のポーリングで観測します
/// （イベントは積まれません）。デバッギ起因の中断（ブレークポイント、
/// ステップ完了、フォルト、コードロード）はイベントキューに
/// [`DebugEvent::Suspended`] を積みます。
pub trait DebuggeeSession {
    /// 接続が生きているか
    fn is_connected(&self) -> bool;

    /// 既知の実行コンテキストを列挙する
    fn contexts(&self) -> Vec<ContextId>;

    /// 現在アクティブな実行コンテキスト
    fn active_context(&self) -> ContextId;

    /// アクティブな実行コンテキストを切り替える
    fn set_active_context(&mut self, context: ContextId) -> Result<()>;

    /// 既知のコードユニットをすべて列挙する
    fn code_units(&self) -> Result<Vec<CodeUnit>>;

    /// 指定したコンテキストから見えるコードユニットを列挙する
    fn code_units_in(&self, context: ContextId) -> Result<Vec<CodeUnit>>;

    /// コンテキストが中断中か
    fn is_suspended(&self, context: ContextId) -> Result<bool>;

    /// コンテキストの中断理由
    fn suspend_reason(&self, context: ContextId) -> Result<SuspendReason>;

    /// コンテキストの中断を要求する
    fn suspend(&mut self, context: ContextId) -> Result<()>;

    /// コンテキストの実行を再開する
    fn resume(&mut self, context: ContextId) -> Result<()>;

    /// ステップイン
    fn step_into(&mut self, context: ContextId) -> Result<()>;

    /// ステップオーバー
    fn step_over(&mut self, context: ContextId) -> Result<()>;

    /// 現在の関数から抜けるまで実行
    fn step_out(&mut self, context: ContextId) -> Result<()>;

    /// ステップ状態を保ったまま続行する
    fn step_continue(&mut self, context: ContextId) -> Result<()>;

    /// 中断中のコンテキストの現在位置
    fn current_location(&self, context: ContextId) -> Result<Option<Location>>;

    /// キューに残っているイベント数
    fn event_count(&self) -> usize;

    /// イベントを1つ取り出す
    fn next_event(&mut self) -> Option<DebugEvent>;

    /// アクティブコンテキスト内の (モジュール, 行) にブレークポイントをアームする
    ///
    /// 行に実行可能コードがない、またはモジュールがアクティブコンテキストから
    /// 見えない場合は `Ok(None)` を返します。
    fn arm(&mut self, module: ModuleId, line: u32) -> Result<Option<Location>>;

    /// アーム済みのLocationを解除する
    fn disarm(&mut self, location: &Location) -> Result<()>;

    /// IDから値を取得する
    fn value(&mut self, context: ContextId, id: ValueId) -> Result<Option<RemoteValue>>;

    /// 親値の名前付きメンバを取得する
    fn member_named(
        &mut self,
        context: ContextId,
        parent: ValueId,
        name: &str,
    ) -> Result<Option<RemoteVariable>>;

    /// 値のメンバを列挙する
    fn members(&mut self, context: ContextId, id: ValueId) -> Result<Vec<RemoteVariable>>;

    /// スコープチェーン上の名前をデバッギに問い合わせる
    fn global(&mut self, context: ContextId, name: &str) -> Result<Option<RemoteValue>>;

    /// 親値のメンバへ代入する
    ///
    /// メンバが存在しない場合は新しいプロパティとして定義されます。
    /// デバッギ側でフォルトが発生した場合は `Ok(Some(fault))` を返します。
    fn set_member(
        &mut self,
        context: ContextId,
        parent: ValueId,
        name: &str,
        value: &str,
    ) -> Result<Option<FaultInfo>>;

    /// (値, メンバ名) に対する値レベルウォッチを設定する
    fn set_watch(
        &mut self,
        context: ContextId,
        value: ValueId,
        member: &str,
        kind: WatchKind,
    ) -> Result<WatchHandle>;

    /// ウォッチを解除する
    fn clear_watch(&mut self, context: ContextId, handle: WatchHandle) -> Result<()>;

    /// 捕捉される例外でも停止するかを切り替える
    fn break_on_caught(&mut self, context: ContextId, enable: bool) -> Result<()>;

    /// 接続を切断する
    fn disconnect(&mut self);
}
