//! 名前解決と式評価
//!
//! 自由形式の名前をデバッギの生きたオブジェクトグラフに対して解決します。
//! コンテキストが固定されていない場合の解決順序は次の通りです：
//! (a) 選択中スタックフレームのローカル変数、(b) `this` レシーバと
//! そのプロトタイプチェーン、(c) グローバルルートオブジェクト、
//! (d) グローバル名前空間オブジェクト、(e) 現在のモジュールの
//! パッケージオブジェクト。最初にメンバが見つかったステップで
//! コンテキストが固定され、以降のドットセグメントはそこから解決されます。

use tracing::debug;

use azami_session::{
    frame_base, ContextId, DebuggeeSession, RemoteValue, RemoteVariable, ValueId, GLOBAL_ID,
    ROOT_ID,
};

use crate::parse::{CompareOp, Expr, LiteralValue, Segment};
use crate::props::PropertyStore;
use crate::{EvalError, Result};

/// プロトタイプチェーンをたどるメンバ名
const PROTO_MEMBER: &str = "__proto__";

/// プロトタイプチェーン探索の深さ上限
const MAX_PROTO_HOPS: usize = 8;

/// 解決済みの変数
///
/// 親値のIDとメンバ名の組で、ウォッチポイントの設定と代入の両方が
/// この形を必要とします。`value` が `None` の場合は「まだ存在しない」
/// プレースホルダで、代入時に新しいプロパティとして定義されます。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVariable {
    pub parent: ValueId,
    pub name: String,
    pub value: Option<RemoteValue>,
    /// 表示用に蓄積したパス（再解決には決して使わない）
    pub path: String,
}

/// 式評価の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluated {
    /// 親とメンバ名まで特定できた変数
    Variable(ResolvedVariable),
    /// 親を持たない値（`#id` 参照やスコープチェーン解決の結果）
    Value(RemoteValue),
    /// `$` 擬似変数
    Property { name: String, value: Option<i64> },
    /// リテラルと比較結果
    Primitive(LiteralValue),
}

impl Evaluated {
    /// ECMA風の真偽値への変換
    pub fn truthy(&self) -> bool {
        match self {
            Evaluated::Variable(v) => match &v.value {
                Some(value) => repr_truthy(&value.repr),
                None => false,
            },
            Evaluated::Value(value) => repr_truthy(&value.repr),
            Evaluated::Property { value, .. } => value.map(|n| n != 0).unwrap_or(false),
            Evaluated::Primitive(l) => match l {
                LiteralValue::Int(n) => *n != 0,
                LiteralValue::Str(s) => !s.is_empty(),
                LiteralValue::Bool(b) => *b,
                LiteralValue::Undefined => false,
            },
        }
    }

    /// 結果のリモート値（あれば）
    pub fn remote_value(&self) -> Option<&RemoteValue> {
        match self {
            Evaluated::Variable(v) => v.value.as_ref(),
            Evaluated::Value(value) => Some(value),
            _ => None,
        }
    }

    /// 表示用の文字列表現
    pub fn display_repr(&self) -> String {
        match self {
            Evaluated::Variable(v) => v
                .value
                .as_ref()
                .map(|value| value.repr.clone())
                .unwrap_or_else(|| "undefined".to_string()),
            Evaluated::Value(value) => value.repr.clone(),
            Evaluated::Property { value, .. } => value
                .map(|n| n.to_string())
                .unwrap_or_else(|| "undefined".to_string()),
            Evaluated::Primitive(l) => match l {
                LiteralValue::Int(n) => n.to_string(),
                LiteralValue::Str(s) => s.clone(),
                LiteralValue::Bool(b) => b.to_string(),
                LiteralValue::Undefined => "undefined".to_string(),
            },
        }
    }
}

fn repr_truthy(repr: &str) -> bool {
    !matches!(repr, "" | "0" | "false" | "null" | "undefined")
}

/// 比較用のスカラー
#[derive(Debug, Clone, PartialEq)]
enum Scalar {
    Int(i64),
    Str(String),
    Bool(bool),
    Undefined,
}

/// 式評価コンテキスト
///
/// 1回の評価（または代入）の間だけ生きる使い捨ての文脈です。
pub struct EvalContext<'a> {
    session: &'a mut dyn DebuggeeSession,
    context: ContextId,
    frame_depth: u32,
    current_package: Option<String>,
    props: &'a mut PropertyStore,
    named_path: Vec<String>,
    name_locked: bool,
}

impl<'a> EvalContext<'a> {
    pub fn new(
        session: &'a mut dyn DebuggeeSession,
        context: ContextId,
        frame_depth: u32,
        current_package: Option<String>,
        props: &'a mut PropertyStore,
    ) -> Self {
        Self {
            session,
            context,
            frame_depth,
            current_package,
            props,
            named_path: Vec::new(),
            name_locked: false,
        }
    }

    /// 式を評価する
    pub fn evaluate(&mut self, expr: &Expr) -> Result<Evaluated> {
        self.named_path.clear();
        self.name_locked = false;
        self.eval_expr(expr)
    }

    /// 評価結果を `$N` 履歴に積む
    pub fn record(&mut self, result: &Evaluated) -> Option<usize> {
        result
            .remote_value()
            .cloned()
            .map(|value| self.props.push_history(value))
    }

    /// 表示用に蓄積したパス
    pub fn display_path(&self) -> String {
        self.named_path.join(".")
    }

    /// パス式へ代入する
    ///
    /// 変数が存在しない場合はプレースホルダを合成し、新しいプロパティを
    /// 定義します。デバッギ側のフォルトは `EvalError::Fault` になります。
    pub fn assign(&mut self, expr: &Expr, value: &str) -> Result<()> {
        self.named_path.clear();
        self.name_locked = false;

        let segments = match expr {
            Expr::Path(segments) => segments,
            _ => {
                return Err(EvalError::BadExpression(
                    "left side of assignment must be a variable".to_string(),
                ))
            }
        };

        // $プロパティへの代入はローカルで完結する
        if let [Segment::Pseudo(key)] = segments.as_slice() {
            if key.is_empty() || key.chars().all(|c| c.is_ascii_digit()) {
                return Err(EvalError::BadExpression(
                    "history entries are read-only".to_string(),
                ));
            }
            let n: i64 = value.parse().map_err(|_| {
                EvalError::BadExpression("$ properties take integer values".to_string())
            })?;
            self.props.put(key, n);
            return Ok(());
        }

        match self.resolve_path(segments, true)? {
            Evaluated::Variable(var) => {
                match self
                    .session
                    .set_member(self.context, var.parent, &var.name, value)?
                {
                    Some(fault) => Err(EvalError::Fault {
                        name: fault.name,
                        information: fault.information,
                    }),
                    None => Ok(()),
                }
            }
            _ => Err(EvalError::BadExpression(
                "cannot assign to this expression".to_string(),
            )),
        }
    }

    fn eval_expr(&mut self, expr: &Expr) -> Result<Evaluated> {
        match expr {
            Expr::Literal(l) => Ok(Evaluated::Primitive(l.clone())),
            Expr::Path(segments) => self.resolve_path(segments, false),
            Expr::Not(inner) => {
                let inner = self.eval_expr(inner)?;
                Ok(Evaluated::Primitive(LiteralValue::Bool(!inner.truthy())))
            }
            Expr::Compare { lhs, op, rhs } => {
                let lhs = self.eval_expr(lhs)?;
                let rhs = self.eval_expr(rhs)?;
                Ok(Evaluated::Primitive(LiteralValue::Bool(compare(
                    &to_scalar(&lhs),
                    *op,
                    &to_scalar(&rhs),
                ))))
            }
        }
    }

    fn set_name(&mut self, name: &str) {
        if self.name_locked {
            return;
        }
        self.named_path.clear();
        self.push_name(name);
    }

    fn push_name(&mut self, name: &str) {
        if self.name_locked || name.is_empty() {
            return;
        }
        self.named_path.push(name.to_string());
    }

    fn lock_name(&mut self) {
        self.name_locked = true;
    }

    /// パスを先頭から解決する
    fn resolve_path(&mut self, segments: &[Segment], create_if_missing: bool) -> Result<Evaluated> {
        let (head, rest) = segments
            .split_first()
            .ok_or_else(|| EvalError::BadExpression("empty path".to_string()))?;

        let mut current: Option<RemoteValue> = match head {
            Segment::Pseudo(key) => {
                if !rest.is_empty() {
                    return Err(EvalError::BadExpression(
                        "$ pseudo-variables have no members".to_string(),
                    ));
                }
                return self.resolve_pseudo(key);
            }
            Segment::Id(id) => {
                let value = self
                    .session
                    .value(self.context, *id)?
                    .ok_or_else(|| EvalError::NotFound(format!("#{id}")))?;
                self.check_fault(&value)?;
                self.set_name(&format!("#{id}"));
                self.lock_name();
                if rest.is_empty() {
                    return Ok(Evaluated::Value(value));
                }
                Some(value)
            }
            Segment::Member(name) => {
                match self.determine_head(name)? {
                    Some((parent, var)) => {
                        self.check_fault(&var.value)?;
                        if rest.is_empty() {
                            return Ok(Evaluated::Variable(ResolvedVariable {
                                parent,
                                name: var.name,
                                value: Some(var.value),
                                path: self.display_path(),
                            }));
                        }
                        Some(var.value)
                    }
                    None => {
                        // 最後の手段としてスコープチェーン全体をデバッギに問い合わせる
                        if let Some(value) = self.session.global(self.context, name)? {
                            self.check_fault(&value)?;
                            self.set_name(name);
                            self.lock_name();
                            if rest.is_empty() {
                                return Ok(Evaluated::Value(value));
                            }
                            Some(value)
                        } else if create_if_missing && rest.is_empty() {
                            // 新しい変数は選択中フレームのローカルとして定義する
                            debug!("synthesizing a placeholder for '{}'", name);
                            return Ok(Evaluated::Variable(ResolvedVariable {
                                parent: frame_base(self.frame_depth),
                                name: name.clone(),
                                value: None,
                                path: name.clone(),
                            }));
                        } else {
                            return Err(EvalError::NotFound(name.clone()));
                        }
                    }
                }
            }
            Segment::Index(_) => {
                return Err(EvalError::BadExpression(
                    "a path cannot start with an index".to_string(),
                ))
            }
        };

        // 残りのセグメントは固定されたコンテキストから順に解決する
        for (at, segment) in rest.iter().enumerate() {
            let name = match segment {
                Segment::Member(name) => name.clone(),
                Segment::Index(i) => i.to_string(),
                _ => {
                    return Err(EvalError::BadExpression(
                        "'#' and '$' are only allowed at the start of a path".to_string(),
                    ))
                }
            };

            let base = match &current {
                Some(value) if value.has_members() => value.id,
                _ => return Err(EvalError::NotFound(name)),
            };

            let last = at == rest.len() - 1;
            match self.locate(base, &name, true)? {
                Some((parent, var)) => {
                    self.check_fault(&var.value)?;
                    self.push_name(&name);
                    if last {
                        return Ok(Evaluated::Variable(ResolvedVariable {
                            parent,
                            name: var.name,
                            value: Some(var.value),
                            path: self.display_path(),
                        }));
                    }
                    current = Some(var.value);
                }
                None if last && create_if_missing => {
                    self.push_name(&name);
                    return Ok(Evaluated::Variable(ResolvedVariable {
                        parent: base,
                        name,
                        value: None,
                        path: self.display_path(),
                    }));
                }
                None => return Err(EvalError::NotFound(name)),
            }
        }

        // restが空のケースは上で返しているのでここには来ない
        Err(EvalError::BadExpression("unresolvable path".to_string()))
    }

    fn resolve_pseudo(&mut self, key: &str) -> Result<Evaluated> {
        if key.is_empty() {
            return match self.props.last() {
                Some(value) => Ok(Evaluated::Value(value.clone())),
                None => Err(EvalError::NotFound("$".to_string())),
            };
        }
        if key.chars().all(|c| c.is_ascii_digit()) {
            let n: usize = key
                .parse()
                .map_err(|_| EvalError::BadExpression(format!("invalid history index ${key}")))?;
            return match self.props.history(n) {
                Some(value) => Ok(Evaluated::Value(value.clone())),
                None => Err(EvalError::NotFound(format!("${key}"))),
            };
        }
        Ok(Evaluated::Property {
            name: key.to_string(),
            value: self.props.get(key),
        })
    }

    /// 固定前の先頭名を5段階の解決順序で探す
    fn determine_head(&mut self, name: &str) -> Result<Option<(ValueId, RemoteVariable)>> {
        let base = frame_base(self.frame_depth);

        // (a) 選択中フレームのローカル
        self.set_name("");
        if let Some(hit) = self.locate(base, name, false)? {
            self.push_name(name);
            self.lock_name();
            return Ok(Some(hit));
        }

        // (b) thisレシーバとそのプロトタイプチェーン
        if let Some(this_var) = self.session.member_named(self.context, base, "this")? {
            if this_var.value.has_members() {
                self.set_name("this");
                if let Some(hit) = self.locate(this_var.value.id, name, true)? {
                    self.push_name(name);
                    self.lock_name();
                    return Ok(Some(hit));
                }
            }
        }

        // (c) グローバルルートオブジェクト
        self.set_name("_root");
        if let Some(hit) = self.locate(ROOT_ID, name, true)? {
            self.push_name(name);
            self.lock_name();
            return Ok(Some(hit));
        }

        // (d) グローバル名前空間オブジェクト
        self.set_name("_global");
        if let Some(hit) = self.locate(GLOBAL_ID, name, true)? {
            self.push_name(name);
            self.lock_name();
            return Ok(Some(hit));
        }

        // (e) 現在のモジュールのパッケージオブジェクト
        if let Some(package) = self.current_package.clone() {
            if let Some(package_val) = self.locate_dotted(GLOBAL_ID, &package)? {
                self.set_name(&format!("_global.{package}"));
                if let Some(hit) = self.locate(package_val, name, true)? {
                    self.push_name(name);
                    self.lock_name();
                    return Ok(Some(hit));
                }
            }
        }

        self.set_name("");
        Ok(None)
    }

    /// 親IDから名前付きメンバを探す
    ///
    /// 見つかったら (メンバを保持していた親のID, 変数) を返します。
    /// `traverse_proto` が真ならプロトタイプチェーンをたどります。
    fn locate(
        &mut self,
        parent: ValueId,
        name: &str,
        traverse_proto: bool,
    ) -> Result<Option<(ValueId, RemoteVariable)>> {
        let mut id = parent;
        let mut hops: Vec<String> = Vec::new();
        let mut remaining = MAX_PROTO_HOPS;

        loop {
            if let Some(var) = self.session.member_named(self.context, id, name)? {
                for hop in &hops {
                    self.push_name(hop);
                }
                return Ok(Some((id, var)));
            }
            if !traverse_proto || remaining == 0 {
                return Ok(None);
            }
            match self.session.member_named(self.context, id, PROTO_MEMBER)? {
                Some(proto) if proto.value.has_members() => {
                    hops.push(PROTO_MEMBER.to_string());
                    id = proto.value.id;
                    remaining -= 1;
                }
                _ => return Ok(None),
            }
        }
    }

    /// ドット区切りの名前を順にたどる（パッケージオブジェクトの解決に使う）
    fn locate_dotted(&mut self, start: ValueId, dotted: &str) -> Result<Option<ValueId>> {
        let mut id = start;
        for part in dotted.split('.') {
            match self.session.member_named(self.context, id, part)? {
                Some(var) if var.value.has_members() => id = var.value.id,
                _ => return Ok(None),
            }
        }
        Ok(Some(id))
    }

    fn check_fault(&self, value: &RemoteValue) -> Result<()> {
        if value.is_exception {
            Err(EvalError::Fault {
                name: value.type_name.clone(),
                information: value.repr.clone(),
            })
        } else {
            Ok(())
        }
    }
}

fn to_scalar(result: &Evaluated) -> Scalar {
    match result {
        Evaluated::Primitive(l) => match l {
            LiteralValue::Int(n) => Scalar::Int(*n),
            LiteralValue::Str(s) => Scalar::Str(s.clone()),
            LiteralValue::Bool(b) => Scalar::Bool(*b),
            LiteralValue::Undefined => Scalar::Undefined,
        },
        Evaluated::Property { value, .. } => match value {
            Some(n) => Scalar::Int(*n),
            None => Scalar::Undefined,
        },
        other => {
            let repr = other.display_repr();
            match repr.as_str() {
                "true" => Scalar::Bool(true),
                "false" => Scalar::Bool(false),
                "undefined" | "null" => Scalar::Undefined,
                _ => match repr.parse::<i64>() {
                    Ok(n) => Scalar::Int(n),
                    Err(_) => Scalar::Str(repr),
                },
            }
        }
    }
}

fn compare(lhs: &Scalar, op: CompareOp, rhs: &Scalar) -> bool {
    use std::cmp::Ordering;

    let ordering = match (lhs, rhs) {
        (Scalar::Int(a), Scalar::Int(b)) => a.cmp(b),
        (Scalar::Bool(a), Scalar::Bool(b)) => a.cmp(b),
        (Scalar::Undefined, Scalar::Undefined) => Ordering::Equal,
        (Scalar::Undefined, _) | (_, Scalar::Undefined) => {
            // undefinedは自分以外の何とも等しくない
            return matches!(op, CompareOp::Ne);
        }
        (a, b) => scalar_string(a).cmp(&scalar_string(b)),
    };

    match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Ne => ordering != Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
    }
}

fn scalar_string(s: &Scalar) -> String {
    match s {
        Scalar::Int(n) => n.to_string(),
        Scalar::Str(s) => s.clone(),
        Scalar::Bool(b) => b.to_string(),
        Scalar::Undefined => "undefined".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use azami_session::loopback::{LoopbackSession, ROOT_CONTEXT};
    use azami_session::frame_base;
    use crate::parse::parse_expression;

    /// ローカル・this・ルート・グローバルを持つセッションを組み立てる
    fn build_session() -> (LoopbackSession, PropertyStore) {
        let mut s = LoopbackSession::new();

        let locals = s.define_value("locals", "locals");
        s.bind_root(ROOT_CONTEXT, frame_base(0), locals);

        let counter = s.define_value("int", "3");
        s.add_member(locals, "count", counter);

        let this = s.define_value("app.Widget", "Widget#1");
        s.add_member(locals, "this", this);
        let title = s.define_value("string", "hello");
        s.add_member(this, "title", title);

        // thisのプロトタイプチェーン上のメンバ
        let proto = s.define_value("app.WidgetBase", "WidgetBase");
        s.add_member(this, "__proto__", proto);
        let shared = s.define_value("int", "7");
        s.add_member(proto, "shared", shared);

        let root = s.define_value("root", "root");
        s.bind_root(ROOT_CONTEXT, azami_session::ROOT_ID, root);
        let stage = s.define_value("app.Stage", "Stage#1");
        s.add_member(root, "stage", stage);

        let global = s.define_value("global", "global");
        s.bind_root(ROOT_CONTEXT, azami_session::GLOBAL_ID, global);
        let version = s.define_value("string", "1.2");
        s.add_member(global, "version", version);

        // パッケージオブジェクト _global.app.util
        let app = s.define_value("package", "app");
        s.add_member(global, "app", app);
        let util = s.define_value("package", "app.util");
        s.add_member(app, "util", util);
        let helper = s.define_value("app.util.Helper", "Helper");
        s.add_member(util, "helper", helper);

        (s, PropertyStore::new())
    }

    fn eval(session: &mut LoopbackSession, props: &mut PropertyStore, text: &str) -> Result<Evaluated> {
        let expr = parse_expression(text)?;
        let mut ctx = EvalContext::new(session, ROOT_CONTEXT, 0, Some("app.util".to_string()), props);
        ctx.evaluate(&expr)
    }

    #[test]
    fn test_locals_win_over_everything() {
        let (mut s, mut props) = build_session();
        let result = eval(&mut s, &mut props, "count").unwrap();
        assert_eq!(result.display_repr(), "3");
    }

    #[test]
    fn test_this_member_resolves_after_locals() {
        let (mut s, mut props) = build_session();
        let result = eval(&mut s, &mut props, "title").unwrap();
        assert_eq!(result.display_repr(), "hello");
    }

    #[test]
    fn test_proto_chain_is_traversed() {
        let (mut s, mut props) = build_session();
        let result = eval(&mut s, &mut props, "shared").unwrap();
        assert_eq!(result.display_repr(), "7");
    }

    #[test]
    fn test_root_then_global_then_package() {
        let (mut s, mut props) = build_session();
        assert_eq!(eval(&mut s, &mut props, "stage").unwrap().display_repr(), "Stage#1");
        assert_eq!(eval(&mut s, &mut props, "version").unwrap().display_repr(), "1.2");
        assert_eq!(eval(&mut s, &mut props, "helper").unwrap().display_repr(), "Helper");
    }

    #[test]
    fn test_unknown_name_is_not_found() {
        let (mut s, mut props) = build_session();
        match eval(&mut s, &mut props, "nothere") {
            Err(EvalError::NotFound(name)) => assert_eq!(name, "nothere"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_id_reference_bypasses_name_search() {
        let (mut s, mut props) = build_session();
        let obj = s.define_value("app.Hidden", "Hidden#9");
        let result = eval(&mut s, &mut props, &format!("#{obj}")).unwrap();
        assert_eq!(result.display_repr(), "Hidden#9");
    }

    #[test]
    fn test_dotted_path_pins_first_hit() {
        let (mut s, mut props) = build_session();
        let expr = parse_expression("this.title").unwrap();
        let mut ctx = EvalContext::new(&mut s, ROOT_CONTEXT, 0, None, &mut props);
        let result = ctx.evaluate(&expr).unwrap();
        assert_eq!(result.display_repr(), "hello");
        assert_eq!(ctx.display_path(), "this.title");
    }

    #[test]
    fn test_pseudo_property_and_history() {
        let (mut s, mut props) = build_session();
        props.put("listline", 12);
        let result = eval(&mut s, &mut props, "$listline").unwrap();
        assert_eq!(result.display_repr(), "12");

        props.push_history(RemoteValue::primitive("int", "99"));
        assert_eq!(eval(&mut s, &mut props, "$").unwrap().display_repr(), "99");
        assert_eq!(eval(&mut s, &mut props, "$1").unwrap().display_repr(), "99");
    }

    #[test]
    fn test_assignment_creates_missing_member() {
        let (mut s, mut props) = build_session();
        let expr = parse_expression("this.brand_new").unwrap();
        {
            let mut ctx = EvalContext::new(&mut s, ROOT_CONTEXT, 0, None, &mut props);
            ctx.assign(&expr, "41").unwrap();
        }
        let result = eval(&mut s, &mut props, "brand_new").unwrap();
        assert_eq!(result.display_repr(), "41");
    }

    #[test]
    fn test_assignment_fault_is_distinct_from_not_found() {
        let (mut s, mut props) = build_session();
        let this = {
            let result = eval(&mut s, &mut props, "title").unwrap();
            match result {
                Evaluated::Variable(v) => v.parent,
                other => panic!("expected Variable, got {other:?}"),
            }
        };
        s.fail_assignment(this, "title");

        let expr = parse_expression("this.title").unwrap();
        let mut ctx = EvalContext::new(&mut s, ROOT_CONTEXT, 0, None, &mut props);
        match ctx.assign(&expr, "oops") {
            Err(EvalError::Fault { .. }) => {}
            other => panic!("expected Fault, got {other:?}"),
        }
    }

    #[test]
    fn test_condition_comparisons() {
        let (mut s, mut props) = build_session();
        assert!(eval(&mut s, &mut props, "count == 3").unwrap().truthy());
        assert!(!eval(&mut s, &mut props, "count == 4").unwrap().truthy());
        assert!(eval(&mut s, &mut props, "count < 10").unwrap().truthy());
        assert!(eval(&mut s, &mut props, "title == 'hello'").unwrap().truthy());
        assert!(eval(&mut s, &mut props, "!count").unwrap() == Evaluated::Primitive(LiteralValue::Bool(false)));
    }
}
