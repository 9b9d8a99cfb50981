//! Azami 式解決コンテキスト
//!
//! このクレートは、ユーザーが入力した自由形式の変数名をデバッギの生きた
//! オブジェクトグラフに対して解決する機能を提供します。print/set コマンドと
//! 条件付きブレークポイント・自動表示式の評価の両方から使われます。

pub mod error;
pub mod eval;
pub mod parse;
pub mod props;

pub use error::EvalError;
pub use eval::{Evaluated, EvalContext, ResolvedVariable};
pub use parse::{parse_expression, CompareOp, Expr, LiteralValue, Segment};
pub use props::PropertyStore;

/// 式評価の結果型
pub type Result<T> = std::result::Result<T, EvalError>;
