//! セッション層のエラー型

use crate::unit::ContextId;
use std::time::Duration;

/// トランスポートレベルの失敗
///
/// 名前解決やブレークポイント解決の「期待される」結果
/// （見つからない・曖昧・ロード中など）はここには含めず、
/// 呼び出し側の結果型で表現します。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// デバッギに接続されていない
    #[error("not connected to a debuggee")]
    NotConnected,

    /// 要求に対する応答が期限内に届かなかった
    #[error("no response from debuggee within {0:?}")]
    NoResponse(Duration),

    /// 中断中でなければならない操作を実行中のコンテキストに要求した
    #[error("execution context {0} is not suspended")]
    NotSuspended(ContextId),

    /// 存在しない実行コンテキストを指定した
    #[error("unknown execution context {0}")]
    UnknownContext(ContextId),

    /// このデバッギがサポートしない操作
    #[error("operation not supported by this debuggee: {0}")]
    NotSupported(&'static str),

    /// 評価中にデバッギ側でフォルトが発生した
    #[error("fault in debuggee: {name}: {information}")]
    Fault { name: String, information: String },
}
