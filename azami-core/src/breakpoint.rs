//! ブレークポイントのライフサイクルと解決

use std::time::Instant;

use anyhow::anyhow;
use tracing::{debug, warn};

use azami_expr::Expr;
use azami_session::{ContextId, DebuggeeSession, Location, ModuleId, SessionError};

use crate::location::LocationSet;
use crate::parse::{parse_location_arg, ParsedLocation};
use crate::settings::Settings;
use crate::unit_cache::{CacheError, CodeUnitCache};

/// ブレークポイントID
pub type BreakpointId = usize;

/// ブレークポイントの解決状態
///
/// AmbiguousとNoCodeは終端で、ユーザーがブレークポイントを再発行するまで
/// 解決パスの対象になりません。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakStatus {
    Unresolved,
    Resolved,
    Ambiguous,
    NoCode,
}

/// 条件式（パース済みの式と元テキスト）
#[derive(Debug, Clone)]
pub struct Condition {
    pub expr: Expr,
    pub text: String,
}

/// ブレークポイント
#[derive(Debug)]
pub struct Breakpoint {
    pub id: BreakpointId,
    status: BreakStatus,
    locations: LocationSet,
    pub enabled: bool,
    pub auto_delete: bool,
    pub auto_disable: bool,
    /// ユニットフィルタ有効時に作られた（伝播の対象外）
    pub single_unit: bool,
    pub silent: bool,
    pub propagable: bool,
    pub hit_count: u64,
    pub condition: Option<Condition>,
    /// ユーザーが入力した位置式。未解決時の再解決と切断後の再適用に使う
    pub source_text: String,
}

impl Breakpoint {
    fn new(id: BreakpointId, source_text: &str) -> Self {
        Self {
            id,
            status: BreakStatus::Unresolved,
            locations: LocationSet::new(),
            enabled: true,
            auto_delete: false,
            auto_disable: false,
            single_unit: false,
            silent: false,
            propagable: true,
            hit_count: 0,
            condition: None,
            source_text: source_text.to_string(),
        }
    }

    pub fn status(&self) -> BreakStatus {
        self.status
    }

    pub fn locations(&self) -> &LocationSet {
        &self.locations
    }

    /// 終端状態（解決パスの対象外）か
    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, BreakStatus::Unresolved)
    }

    fn set_resolved(&mut self, locations: LocationSet) {
        debug_assert!(!locations.is_empty());
        self.locations = locations;
        self.status = BreakStatus::Resolved;
    }

    fn set_unresolved(&mut self) {
        self.locations.clear();
        self.status = BreakStatus::Unresolved;
    }

    fn mark_ambiguous(&mut self) {
        self.locations.clear();
        self.status = BreakStatus::Ambiguous;
    }

    fn mark_no_code(&mut self) {
        self.locations.clear();
        self.status = BreakStatus::NoCode;
    }

    fn add_location(&mut self, location: Location) -> bool {
        debug_assert_eq!(self.status, BreakStatus::Resolved);
        self.locations.add(location)
    }
}

/// create() の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakCreation {
    /// 新しいブレークポイントを作ってアームした
    Created {
        id: BreakpointId,
        locations: LocationSet,
    },
    /// 既存のブレークポイントのLocationSetを別コンテキストへ広げた
    Extended {
        id: BreakpointId,
        location: Location,
    },
    /// 同じ場所に既に設定済み
    Existing { id: BreakpointId },
    /// どこにもアームできなかった（呼び出し側が未解決として保存する）
    NothingArmed,
}

/// 解決パスの1ブレークポイント分の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    Resolved(LocationSet),
    Unresolved,
    Ambiguous(Vec<ModuleId>),
    NoCode,
    InProgress,
}

/// 伝播の1ブレークポイント分の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Propagation {
    Added { id: BreakpointId, location: Location },
    /// ユニットのモジュールテーブルが報告中で今回は伝播できなかった
    Skipped { id: BreakpointId },
}

/// enable() の動作モード
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnableMode {
    Normal,
    /// ヒット後に自動で無効化
    Once,
    /// ヒット後に自動で削除
    Delete,
}

/// アクティブコンテキストを一時的に切り替えて操作を行う
///
/// リモートのアーム/ディスアーム要求は現在アクティブなコンテキストを対象と
/// するため、別コンテキストのLocationを操作するときは、切り替え・未中断なら
/// 中断・要求発行・元のアクティブへ復帰（こちらが中断した場合のみ再開）の
/// 手順を踏みます。
pub fn with_active_context<T>(
    session: &mut dyn DebuggeeSession,
    target: ContextId,
    settings: &Settings,
    f: impl FnOnce(&mut dyn DebuggeeSession) -> crate::Result<T>,
) -> crate::Result<T> {
    let saved = session.active_context();
    if saved == target {
        return f(session);
    }

    session.set_active_context(target)?;
    let was_suspended = session.is_suspended(target)?;
    if !was_suspended {
        session.suspend(target)?;
        let deadline = Instant::now() + settings.halt_timeout;
        while !session.is_suspended(target)? {
            if Instant::now() >= deadline {
                let _ = session.set_active_context(saved);
                return Err(SessionError::NoResponse(settings.halt_timeout).into());
            }
            std::thread::sleep(settings.poll_interval);
        }
    }

    let result = f(session);

    // こちらが中断した場合だけ再開して、元の実行状態へ戻す
    if !was_suspended {
        let _ = session.resume(target);
    }
    let _ = session.set_active_context(saved);
    result
}

/// テンプレートモジュールに似たモジュールを `context` から見える全ユニット
/// （フィルタ有効時はそのユニットのみ）で探し、行をアームする
///
/// 戻り値は (アームできたLocationの集合, 報告中のユニットを飛ばしたか)。
fn arm_everywhere(
    session: &mut dyn DebuggeeSession,
    cache: &CodeUnitCache,
    settings: &Settings,
    template_module: ModuleId,
    line: u32,
    context: ContextId,
) -> crate::Result<(LocationSet, bool)> {
    let template = cache.resolve(template_module)?.clone();
    let units = session.code_units_in(context)?;
    let filter = cache.unit_filter().map(|s| s.to_string());

    let mut set = LocationSet::new();
    let mut in_progress = false;

    with_active_context(session, context, settings, |session| {
        for unit in &units {
            if let Some(f) = &filter {
                if !unit.name().eq_ignore_ascii_case(f) {
                    continue;
                }
            }
            match cache.similar_modules(unit, &template) {
                Err(CacheError::InProgress(name)) => {
                    debug!("unit '{}' still loading, breakpoint at line {} not set", name, line);
                    in_progress = true;
                }
                Err(e) => return Err(e.into()),
                Ok(similar) => {
                    // ユニットごとに最初にアームできた1つだけ追加する
                    for module in similar {
                        if let Some(location) = session.arm(module.id, line)? {
                            set.add(location);
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    })?;

    Ok((set, in_progress))
}

/// 最後にロードされたユニットの中でテンプレートに似たモジュールを1つアームする
fn arm_in_newest_unit(
    session: &mut dyn DebuggeeSession,
    cache: &CodeUnitCache,
    settings: &Settings,
    template_module: ModuleId,
    line: u32,
    context: ContextId,
) -> crate::Result<Option<Location>> {
    let template = cache.resolve(template_module)?.clone();
    let units = session.code_units_in(context)?;
    // ロード順序番号が最大のユニットが「最後にロードされた」ユニット
    let newest = match units.into_iter().max_by_key(|u| u.sequence) {
        Some(u) => u,
        None => return Ok(None),
    };

    let similar = cache.similar_modules(&newest, &template)?;
    with_active_context(session, context, settings, |session| {
        for module in similar {
            if let Some(location) = session.arm(module.id, line)? {
                return Ok(Some(location));
            }
        }
        Ok(None)
    })
}

/// ブレークポイントレジストリ
#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    breakpoints: Vec<Breakpoint>,
    next_id: BreakpointId,
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self {
            breakpoints: Vec::new(),
            next_id: 1,
        }
    }

    /// (モジュール, 行, コンテキスト) にブレークポイントを作る
    ///
    /// 既に同じ (モジュール, 行) を別コンテキストでカバーするブレークポイントが
    /// あればそのLocationSetを広げ、なければ `context` から見える全ユニットに
    /// アームを試みます。どこにもアームできなければ `NothingArmed` を返し、
    /// 呼び出し側が元テキストで未解決ブレークポイントを保存します。
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &mut self,
        session: &mut dyn DebuggeeSession,
        cache: &CodeUnitCache,
        settings: &Settings,
        module: ModuleId,
        line: u32,
        context: ContextId,
        propagable: bool,
        source_text: &str,
    ) -> crate::Result<BreakCreation> {
        if let Some(at) = self
            .breakpoints
            .iter()
            .position(|b| b.locations.covers(module, line))
        {
            if self.breakpoints[at].locations.covers_in(module, line, context) {
                return Ok(BreakCreation::Existing {
                    id: self.breakpoints[at].id,
                });
            }

            // 別コンテキストからの要求: 最後にロードされたユニットへ広げる
            let location = arm_in_newest_unit(session, cache, settings, module, line, context)?;
            return Ok(match location {
                Some(location) => {
                    self.breakpoints[at].add_location(location);
                    BreakCreation::Extended {
                        id: self.breakpoints[at].id,
                        location,
                    }
                }
                None => BreakCreation::NothingArmed,
            });
        }

        let (locations, _in_progress) =
            arm_everywhere(session, cache, settings, module, line, context)?;
        if locations.is_empty() {
            return Ok(BreakCreation::NothingArmed);
        }

        let id = self.next_id;
        self.next_id += 1;
        let mut bp = Breakpoint::new(id, source_text);
        bp.single_unit = cache.is_filtered();
        bp.propagable = propagable;
        bp.set_resolved(locations.clone());
        self.breakpoints.push(bp);
        Ok(BreakCreation::Created { id, locations })
    }

    /// 位置式をパースできなかったブレークポイントを未解決のまま保存する
    pub fn create_unresolved(&mut self, source_text: &str, single_unit: bool) -> BreakpointId {
        let id = self.next_id;
        self.next_id += 1;
        let mut bp = Breakpoint::new(id, source_text);
        bp.single_unit = single_unit;
        self.breakpoints.push(bp);
        id
    }

    /// 解決パス
    ///
    /// 未解決のブレークポイントそれぞれについて、保存してある元テキストを
    /// 現在のモジュール/行状態に対して再パースします。成功はResolvedに昇格して
    /// アームし、同程度の候補が複数ならAmbiguous（終端）、アームできる行が
    /// なければNoCode（終端）に昇格します。報告中のユニットしかない場合は
    /// 飲み込んで次回に再試行します。終端状態のブレークポイントは対象外です。
    pub fn resolve_pass(
        &mut self,
        session: &mut dyn DebuggeeSession,
        cache: &CodeUnitCache,
        settings: &Settings,
        current_module: Option<ModuleId>,
    ) -> Vec<(BreakpointId, ResolveOutcome)> {
        let pending: Vec<(usize, BreakpointId, String)> = self
            .breakpoints
            .iter()
            .enumerate()
            .filter(|(_, b)| b.status == BreakStatus::Unresolved)
            .map(|(at, b)| (at, b.id, b.source_text.clone()))
            .collect();

        let mut reports = Vec::new();
        for (at, id, text) in pending {
            let parsed = match parse_location_arg(cache, current_module, &text) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("breakpoint {} has an unparsable location '{}': {}", id, text, e);
                    continue;
                }
            };

            match parsed {
                ParsedLocation::NoMatch => {
                    // まだロードされていない。次のパスで再試行する
                }
                ParsedLocation::Ambiguous { candidates } => {
                    self.breakpoints[at].mark_ambiguous();
                    reports.push((id, ResolveOutcome::Ambiguous(candidates)));
                }
                ParsedLocation::Resolved { module, line } => {
                    let context = match context_of_module(session, module) {
                        Ok(Some(context)) => context,
                        Ok(None) => continue,
                        Err(e) => {
                            warn!("resolving breakpoint {} failed: {}", id, e);
                            continue;
                        }
                    };
                    match arm_everywhere(session, cache, settings, module, line, context) {
                        Ok((locations, _)) if !locations.is_empty() => {
                            self.breakpoints[at].set_resolved(locations.clone());
                            reports.push((id, ResolveOutcome::Resolved(locations)));
                        }
                        Ok((_, true)) => {
                            // 報告中のユニットだけだった。飲み込んで再試行
                            reports.push((id, ResolveOutcome::InProgress));
                        }
                        Ok((_, false)) => {
                            self.breakpoints[at].mark_no_code();
                            reports.push((id, ResolveOutcome::NoCode));
                        }
                        Err(e) => {
                            // 個別の失敗は残りの解決を妨げない
                            warn!("resolving breakpoint {} failed: {}", id, e);
                        }
                    }
                }
            }
        }
        reports
    }

    /// 伝播パス
    ///
    /// Resolvedで伝播可能・非単一ユニットの各ブレークポイントについて、
    /// `context` で最後にロードされたユニットから似たモジュールを探し、
    /// 見つかればちょうど1つの新しいLocationを追加します。
    pub fn propagate(
        &mut self,
        session: &mut dyn DebuggeeSession,
        cache: &CodeUnitCache,
        settings: &Settings,
        context: ContextId,
    ) -> crate::Result<Vec<Propagation>> {
        let units = session.code_units_in(context)?;
        let newest = match units.into_iter().max_by_key(|u| u.sequence) {
            Some(u) => u,
            None => return Ok(Vec::new()),
        };

        let candidates: Vec<(usize, BreakpointId, Location)> = self
            .breakpoints
            .iter()
            .enumerate()
            .filter(|(_, b)| {
                b.status == BreakStatus::Resolved && b.propagable && !b.single_unit
            })
            .filter_map(|(at, b)| b.locations.first().map(|l| (at, b.id, *l)))
            .collect();

        let mut reports = Vec::new();
        for (at, id, template_loc) in candidates {
            let template = match cache.resolve(template_loc.module) {
                Ok(m) => m.clone(),
                Err(_) => continue,
            };

            let similar = match cache.similar_modules(&newest, &template) {
                Ok(similar) => similar,
                Err(CacheError::InProgress(_)) => {
                    reports.push(Propagation::Skipped { id });
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let already = &self.breakpoints[at].locations;
            let fresh: Vec<ModuleId> = similar
                .into_iter()
                .filter(|m| !already.covers_in(m.id, template_loc.line, context))
                .map(|m| m.id)
                .collect();

            // アームできた最初の1つだけを新しいLocationとして追加する
            let armed = with_active_context(session, context, settings, |session| {
                for module in fresh {
                    if let Some(location) = session.arm(module, template_loc.line)? {
                        return Ok(Some(location));
                    }
                }
                Ok(None)
            })?;
            if let Some(location) = armed {
                if self.breakpoints[at].add_location(location) {
                    reports.push(Propagation::Added { id, location });
                }
            }
        }
        Ok(reports)
    }

    /// ブレークポイントを有効化し、全Locationを再アームする
    ///
    /// 一つでもアームできればtrueを返します。
    pub fn enable(
        &mut self,
        session: &mut dyn DebuggeeSession,
        settings: &Settings,
        id: BreakpointId,
        mode: EnableMode,
    ) -> crate::Result<bool> {
        let at = self.index_of(id)?;
        let locations: Vec<Location> = self.breakpoints[at].locations.iter().copied().collect();

        let mut worked = false;
        for location in locations {
            let armed = with_active_context(session, location.context, settings, |session| {
                Ok(session.arm(location.module, location.line)?)
            })?;
            worked |= armed.is_some();
        }

        if worked {
            let bp = &mut self.breakpoints[at];
            bp.enabled = true;
            bp.auto_disable = matches!(mode, EnableMode::Once);
            bp.auto_delete = matches!(mode, EnableMode::Delete);
        }
        Ok(worked)
    }

    /// ブレークポイントを無効化し、全Locationをディスアームする
    pub fn disable(
        &mut self,
        session: &mut dyn DebuggeeSession,
        settings: &Settings,
        id: BreakpointId,
    ) -> crate::Result<()> {
        let at = self.index_of(id)?;
        let locations: Vec<Location> = self.breakpoints[at].locations.iter().copied().collect();

        for location in locations {
            with_active_context(session, location.context, settings, |session| {
                session.disarm(&location)?;
                Ok(())
            })?;
        }
        self.breakpoints[at].enabled = false;
        Ok(())
    }

    /// ブレークポイントを削除する（Resolvedならディスアームしてから）
    pub fn remove(
        &mut self,
        session: &mut dyn DebuggeeSession,
        settings: &Settings,
        id: BreakpointId,
    ) -> crate::Result<Breakpoint> {
        let at = self.index_of(id)?;
        if self.breakpoints[at].status == BreakStatus::Resolved {
            let locations: Vec<Location> =
                self.breakpoints[at].locations.iter().copied().collect();
            for location in locations {
                with_active_context(session, location.context, settings, |session| {
                    session.disarm(&location)?;
                    Ok(())
                })?;
            }
        }
        Ok(self.breakpoints.remove(at))
    }

    /// 元テキストで未解決ブレークポイントを削除する
    pub fn remove_unresolved(&mut self, source_text: &str) -> Option<BreakpointId> {
        let at = self.breakpoints.iter().position(|b| {
            b.status == BreakStatus::Unresolved && b.source_text == source_text
        })?;
        Some(self.breakpoints.remove(at).id)
    }

    /// 切断時の処理: ResolvedをUnresolvedへ降格する
    ///
    /// Locationは消えますが元テキストは残るので、再接続後の解決パスが
    /// 再アームを試みます。Ambiguous/NoCodeは終端のまま保たれます。
    pub fn demote_for_disconnect(&mut self) {
        for bp in &mut self.breakpoints {
            if bp.status == BreakStatus::Resolved {
                bp.set_unresolved();
            }
        }
    }

    /// 指定Locationにかかる有効なブレークポイントのIDを集める
    pub fn matching_at(&self, location: &Location) -> Vec<BreakpointId> {
        self.breakpoints
            .iter()
            .filter(|b| {
                b.locations
                    .covers_in(location.module, location.line, location.context)
            })
            .map(|b| b.id)
            .collect()
    }

    /// ヒットを記録する
    pub fn record_hit(&mut self, id: BreakpointId) {
        if let Ok(at) = self.index_of(id) {
            self.breakpoints[at].hit_count += 1;
        }
    }

    pub fn get(&self, id: BreakpointId) -> Option<&Breakpoint> {
        self.breakpoints.iter().find(|b| b.id == id)
    }

    pub fn get_mut(&mut self, id: BreakpointId) -> Option<&mut Breakpoint> {
        self.breakpoints.iter_mut().find(|b| b.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.iter()
    }

    pub fn len(&self) -> usize {
        self.breakpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }

    fn index_of(&self, id: BreakpointId) -> crate::Result<usize> {
        self.breakpoints
            .iter()
            .position(|b| b.id == id)
            .ok_or_else(|| anyhow!("breakpoint {} not found", id))
    }
}

/// モジュールを含むユニットの所属コンテキストを調べる
fn context_of_module(
    session: &dyn DebuggeeSession,
    module: ModuleId,
) -> Result<Option<ContextId>, SessionError> {
    let units = session.code_units()?;
    Ok(units.iter().find(|u| u.contains(module)).map(|u| u.context))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_breakpoints_never_hold_locations() {
        let mut registry = BreakpointRegistry::new();
        let id = registry.create_unresolved("Later.ext:10", false);
        let bp = registry.get(id).unwrap();
        assert_eq!(bp.status(), BreakStatus::Unresolved);
        assert!(bp.locations().is_empty());
    }

    #[test]
    fn test_demote_keeps_terminal_statuses() {
        let mut registry = BreakpointRegistry::new();
        let id = registry.create_unresolved("Later.ext:10", false);
        registry.get_mut(id).unwrap().mark_ambiguous();
        registry.demote_for_disconnect();
        assert_eq!(registry.get(id).unwrap().status(), BreakStatus::Ambiguous);
    }
}
