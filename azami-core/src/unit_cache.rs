//! コードユニットキャッシュ
//!
//! グローバルモジュールIDからモジュールへの対応を所有し、名前で重複を
//! 排除した表示用リストと、1つのコードユニットに絞ったフィルタビューを
//! 提供します。デバッギがキャッシュ済みより多くのユニットを報告したとき、
//! またはdirtyフラグが立ったときに再ロードします。

use std::collections::{HashMap, HashSet};

use regex::Regex;
use tracing::debug;

use azami_session::{CodeUnit, DebuggeeSession, Module, ModuleId, SessionError};

/// キャッシュ操作の失敗
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// モジュールが見つからない
    #[error("module #{0} not found")]
    NotFound(ModuleId),

    /// コードユニットのモジュールテーブルがまだ報告中
    ///
    /// 常に再試行可能で、終端状態にはなりません。
    #[error("code unit '{0}' is still loading")]
    InProgress(String),

    /// トランスポートレベルの失敗
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// コードユニットキャッシュ
#[derive(Debug, Default)]
pub struct CodeUnitCache {
    by_id: HashMap<ModuleId, Module>,
    /// 重複排除・フィルタ適用後の表示用リスト（名前順）
    view: Vec<Module>,
    unit_filter: Option<String>,
    units_loaded: usize,
    dirty: bool,
}

impl CodeUnitCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 次のrefreshで必ず再ロードさせる
    pub fn set_dirty(&mut self) {
        self.dirty = true;
    }

    /// ユニットフィルタが有効か
    pub fn is_filtered(&self) -> bool {
        self.unit_filter.is_some()
    }

    /// 現在のユニットフィルタ名
    pub fn unit_filter(&self) -> Option<&str> {
        self.unit_filter.as_deref()
    }

    /// 必要ならセッションからキャッシュを再構築する
    pub fn refresh(&mut self, session: &dyn DebuggeeSession) -> Result<(), SessionError> {
        let units = session.code_units()?;
        if self.dirty || units.len() > self.units_loaded {
            self.reload(&units);
        }
        Ok(())
    }

    fn reload(&mut self, units: &[CodeUnit]) {
        self.by_id.clear();
        self.view.clear();

        // IDはセッション全体で一意なので、フィルタに関係なく全モジュールを
        // IDテーブルに載せる。中断位置の解決に必要になる。
        let mut complete = true;
        let mut seen: HashSet<String> = HashSet::new();
        for unit in units {
            if !unit.complete {
                complete = false;
            }
            for module in &unit.modules {
                self.by_id.insert(module.id, module.clone());

                let keep = match &self.unit_filter {
                    // フィルタなし: 生識別子の衝突は最初の1つだけ残す
                    None => seen.insert(module.raw_identity.clone()),
                    Some(filter) => unit.name().eq_ignore_ascii_case(filter),
                };
                if keep {
                    self.view.push(module.clone());
                }
            }
        }
        self.view.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| a.full_path().cmp(&b.full_path()))
        });

        // 全ユニットが報告完了の場合だけキャッシュ済み数を進める
        if complete {
            self.units_loaded = units.len();
        }
        self.dirty = false;
        debug!(
            "reloaded code unit cache: {} units, {} modules, {} in view",
            units.len(),
            self.by_id.len(),
            self.view.len()
        );
    }

    /// モジュールIDを解決する
    pub fn resolve(&self, id: ModuleId) -> Result<&Module, CacheError> {
        self.by_id.get(&id).ok_or(CacheError::NotFound(id))
    }

    /// 重複排除・フィルタ適用後のモジュール一覧（名前順）
    pub fn module_list(&self) -> &[Module] {
        &self.view
    }

    /// キャッシュを1つのコードユニットに絞る（Noneで全ユニットに戻す）
    ///
    /// 名前が既知のユニットに一致しなければfalseを返し、状態は変わりません。
    pub fn set_unit_filter(
        &mut self,
        session: &dyn DebuggeeSession,
        unit_name: Option<&str>,
    ) -> Result<bool, SessionError> {
        match unit_name {
            None => {
                self.unit_filter = None;
            }
            Some(name) => {
                let units = session.code_units()?;
                let known = units.iter().any(|u| u.name().eq_ignore_ascii_case(name));
                if !known {
                    return Ok(false);
                }
                self.unit_filter = Some(name.to_string());
            }
        }
        self.dirty = true;
        self.refresh(session)?;
        Ok(true)
    }

    /// 名前パターンに一致するモジュールを名前順で返す
    ///
    /// 先頭・末尾の `*` で後方・前方・部分一致を、ドットを含むパターンで
    /// パッケージパス一致を表します。完全一致が1つあれば、それだけに
    /// 絞り込まれます。
    pub fn find_by_pattern(&self, pattern: &str) -> Vec<Module> {
        let matcher = match pattern_matcher(pattern) {
            Some(m) => m,
            None => return Vec::new(),
        };

        // ドットを含むパターンはパッケージパス全体に、含まないものは
        // 表示名に対して照合する
        let use_path = pattern.trim_matches('*').contains('.');

        let mut hits = Vec::new();
        for module in &self.view {
            let full = module.full_path();
            if full == pattern || module.name == pattern {
                // 完全一致があれば他の候補は捨てる
                return vec![module.clone()];
            }
            let target = if use_path { full.as_str() } else { module.name.as_str() };
            if matcher.is_match(target) {
                hits.push(module.clone());
            }
        }
        hits
    }

    /// テンプレートに「似た」モジュールをユニット内から探す
    ///
    /// 一致は (パッケージ, 名前, 行数) による近似ヒューリスティックです。
    /// ユニットのモジュールテーブルが報告中の場合はInProgressで失敗します
    /// （再試行可能）。
    pub fn similar_modules(
        &self,
        unit: &CodeUnit,
        template: &Module,
    ) -> Result<Vec<Module>, CacheError> {
        if !unit.complete {
            return Err(CacheError::InProgress(unit.name().to_string()));
        }
        Ok(unit
            .modules
            .iter()
            .filter(|m| m.looks_like(template))
            .cloned()
            .collect())
    }
}

/// ユーザーパターンをアンカー付きの正規表現に変換する
fn pattern_matcher(pattern: &str) -> Option<Regex> {
    let leading = pattern.starts_with('*') && pattern.len() > 1;
    let trailing = pattern.ends_with('*') && pattern.len() > 1;

    let regex = if leading && trailing {
        let core = &pattern[1..pattern.len() - 1];
        regex::escape(core)
    } else if leading {
        format!("{}$", regex::escape(&pattern[1..]))
    } else if trailing {
        format!("^{}", regex::escape(&pattern[..pattern.len() - 1]))
    } else if pattern.contains('.') {
        // ドット付きパターンはパス境界から一致させる
        // （`util.Timer.ext` が `Gutil.Timer.ext` に当たらないように）
        format!("(^|\\.){}", regex::escape(pattern))
    } else {
        format!("^{}", regex::escape(pattern))
    };

    Regex::new(&regex).ok()
}
