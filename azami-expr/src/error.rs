//! 式評価のエラー型

use azami_session::SessionError;

/// 式評価で起きうる失敗
///
/// `NotFound` と `Fault` は区別されます。前者は名前がどの解決ステップでも
/// 見つからなかったこと、後者は参照や代入の最中にデバッギ側で例外が
/// 発生したことを意味します。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    /// 名前がどこにも見つからなかった
    #[error("variable '{0}' not found")]
    NotFound(String),

    /// 評価中にデバッギ側でフォルトが発生した
    #[error("fault while evaluating: {name}: {information}")]
    Fault { name: String, information: String },

    /// 式の構文が不正
    #[error("invalid expression: {0}")]
    BadExpression(String),

    /// トランスポートレベルの失敗
    #[error(transparent)]
    Session(#[from] SessionError),
}
