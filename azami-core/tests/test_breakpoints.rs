//! ブレークポイントの解決・伝播・有効化のテスト

use azami_core::{
    BreakCreation, BreakStatus, BreakpointRegistry, CodeUnitCache, EnableMode, Propagation,
    ResolveOutcome, Settings,
};
use azami_session::loopback::{LoopbackSession, ROOT_CONTEXT};
use azami_session::{DebuggeeSession, Location, Module, ModuleId};

fn module(id: ModuleId, package: &str, name: &str, lines: u32) -> Module {
    Module {
        id,
        name: name.to_string(),
        package: package.to_string(),
        line_count: lines,
        raw_identity: format!("{package}.{name}#{id}"),
    }
}

fn timer_module(id: ModuleId) -> Module {
    module(id, "app.util", "Timer.ext", 120)
}

/// メインユニットをロードしてルートコンテキストを中断した状態を作る
fn base() -> (LoopbackSession, CodeUnitCache, BreakpointRegistry, Settings) {
    let mut s = LoopbackSession::new();
    s.load_unit(
        ROOT_CONTEXT,
        "main.unit",
        vec![module(1, "app", "Main.ext", 200), timer_module(7)],
    );
    s.suspend(ROOT_CONTEXT).unwrap();
    while s.next_event().is_some() {}

    let mut cache = CodeUnitCache::new();
    cache.refresh(&s).unwrap();
    (s, cache, BreakpointRegistry::new(), Settings::fast())
}

#[test]
fn test_create_arms_and_resolves() {
    let (mut s, cache, mut registry, settings) = base();

    let created = registry
        .create(&mut s, &cache, &settings, 7, 42, ROOT_CONTEXT, true, "#7:42")
        .unwrap();
    let id = match created {
        BreakCreation::Created { id, locations } => {
            assert_eq!(locations.len(), 1);
            id
        }
        other => panic!("expected Created, got {other:?}"),
    };

    let bp = registry.get(id).unwrap();
    assert_eq!(bp.status(), BreakStatus::Resolved);
    assert!(!bp.locations().is_empty());
    assert!(s.is_armed(&Location::new(7, 42, ROOT_CONTEXT)));
}

#[test]
fn test_create_same_location_twice_returns_existing() {
    let (mut s, cache, mut registry, settings) = base();

    let first = registry
        .create(&mut s, &cache, &settings, 7, 42, ROOT_CONTEXT, true, "#7:42")
        .unwrap();
    let id = match first {
        BreakCreation::Created { id, .. } => id,
        other => panic!("expected Created, got {other:?}"),
    };

    let second = registry
        .create(&mut s, &cache, &settings, 7, 42, ROOT_CONTEXT, true, "#7:42")
        .unwrap();
    assert_eq!(second, BreakCreation::Existing { id });
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_create_with_no_executable_code_arms_nothing() {
    let (mut s, cache, mut registry, settings) = base();

    let created = registry
        .create(&mut s, &cache, &settings, 7, 999, ROOT_CONTEXT, true, "#7:999")
        .unwrap();
    assert_eq!(created, BreakCreation::NothingArmed);
    assert!(registry.is_empty());
}

#[test]
fn test_resolve_pass_promotes_unresolved_and_is_idempotent() {
    let mut s = LoopbackSession::new();
    s.suspend(ROOT_CONTEXT).unwrap();
    let mut cache = CodeUnitCache::new();
    cache.refresh(&s).unwrap();
    let mut registry = BreakpointRegistry::new();
    let settings = Settings::fast();

    let id = registry.create_unresolved("Timer.ext:12", false);

    // まだコードがないので何も変わらない
    let reports = registry.resolve_pass(&mut s, &cache, &settings, None);
    assert!(reports.is_empty());
    assert_eq!(registry.get(id).unwrap().status(), BreakStatus::Unresolved);
    assert!(registry.get(id).unwrap().locations().is_empty());

    s.load_unit(ROOT_CONTEXT, "main.unit", vec![timer_module(7)]);
    cache.refresh(&s).unwrap();

    let reports = registry.resolve_pass(&mut s, &cache, &settings, None);
    assert_eq!(reports.len(), 1);
    match &reports[0] {
        (got, ResolveOutcome::Resolved(locations)) => {
            assert_eq!(*got, id);
            assert_eq!(locations.len(), 1);
        }
        other => panic!("expected Resolved, got {other:?}"),
    }
    assert_eq!(registry.get(id).unwrap().status(), BreakStatus::Resolved);
    assert!(s.is_armed(&Location::new(7, 12, ROOT_CONTEXT)));

    // コードロードを挟まない2回目のパスは何も変えない
    let again = registry.resolve_pass(&mut s, &cache, &settings, None);
    assert!(again.is_empty());
    assert_eq!(registry.get(id).unwrap().status(), BreakStatus::Resolved);
}

#[test]
fn test_resolve_pass_ambiguous_is_terminal() {
    let mut s = LoopbackSession::new();
    s.suspend(ROOT_CONTEXT).unwrap();
    let mut cache = CodeUnitCache::new();
    let mut registry = BreakpointRegistry::new();
    let settings = Settings::fast();

    let id = registry.create_unresolved("Tim*:5", false);
    s.load_unit(
        ROOT_CONTEXT,
        "main.unit",
        vec![timer_module(7), module(8, "app.util", "Timeout.ext", 40)],
    );
    cache.refresh(&s).unwrap();

    let reports = registry.resolve_pass(&mut s, &cache, &settings, None);
    match &reports[0] {
        (got, ResolveOutcome::Ambiguous(candidates)) => {
            assert_eq!(*got, id);
            assert_eq!(candidates.len(), 2);
        }
        other => panic!("expected Ambiguous, got {other:?}"),
    }
    let bp = registry.get(id).unwrap();
    assert_eq!(bp.status(), BreakStatus::Ambiguous);
    assert!(bp.locations().is_empty());

    // 終端状態は次のパスでは触られない
    let again = registry.resolve_pass(&mut s, &cache, &settings, None);
    assert!(again.is_empty());
    assert_eq!(registry.get(id).unwrap().status(), BreakStatus::Ambiguous);
}

#[test]
fn test_resolve_pass_no_code_is_terminal() {
    let mut s = LoopbackSession::new();
    s.suspend(ROOT_CONTEXT).unwrap();
    let mut cache = CodeUnitCache::new();
    let mut registry = BreakpointRegistry::new();
    let settings = Settings::fast();

    let id = registry.create_unresolved("Timer.ext:999", false);
    s.load_unit(ROOT_CONTEXT, "main.unit", vec![timer_module(7)]);
    cache.refresh(&s).unwrap();

    let reports = registry.resolve_pass(&mut s, &cache, &settings, None);
    assert_eq!(reports, vec![(id, ResolveOutcome::NoCode)]);
    assert_eq!(registry.get(id).unwrap().status(), BreakStatus::NoCode);
    assert!(registry.get(id).unwrap().locations().is_empty());

    let again = registry.resolve_pass(&mut s, &cache, &settings, None);
    assert!(again.is_empty());
}

#[test]
fn test_resolve_pass_in_progress_is_swallowed_and_retried() {
    let mut s = LoopbackSession::new();
    s.suspend(ROOT_CONTEXT).unwrap();
    let mut cache = CodeUnitCache::new();
    let mut registry = BreakpointRegistry::new();
    let settings = Settings::fast();

    let id = registry.create_unresolved("Late.ext:3", false);
    s.load_unit_incomplete(
        ROOT_CONTEXT,
        "loading.unit",
        vec![module(5, "app", "Late.ext", 60)],
    );
    cache.refresh(&s).unwrap();

    let reports = registry.resolve_pass(&mut s, &cache, &settings, None);
    assert_eq!(reports, vec![(id, ResolveOutcome::InProgress)]);
    assert_eq!(registry.get(id).unwrap().status(), BreakStatus::Unresolved);

    s.complete_unit("loading.unit");
    cache.set_dirty();
    cache.refresh(&s).unwrap();

    let reports = registry.resolve_pass(&mut s, &cache, &settings, None);
    match &reports[0] {
        (_, ResolveOutcome::Resolved(_)) => {}
        other => panic!("expected Resolved, got {other:?}"),
    }
    assert_eq!(registry.get(id).unwrap().status(), BreakStatus::Resolved);
}

#[test]
fn test_propagation_adds_exactly_one_location() {
    let (mut s, mut cache, mut registry, settings) = base();

    let id = match registry
        .create(&mut s, &cache, &settings, 7, 42, ROOT_CONTEXT, true, "#7:42")
        .unwrap()
    {
        BreakCreation::Created { id, .. } => id,
        other => panic!("expected Created, got {other:?}"),
    };

    // パッケージ・名前・行数が同一のモジュールを含む第二ユニットが現れる
    s.load_unit(ROOT_CONTEXT, "second.unit", vec![timer_module(19)]);
    cache.refresh(&s).unwrap();

    let reports = registry
        .propagate(&mut s, &cache, &settings, ROOT_CONTEXT)
        .unwrap();
    assert_eq!(
        reports,
        vec![Propagation::Added {
            id,
            location: Location::new(19, 42, ROOT_CONTEXT),
        }]
    );

    let bp = registry.get(id).unwrap();
    assert_eq!(bp.locations().len(), 2);
    assert!(bp.locations().covers_in(7, 42, ROOT_CONTEXT));
    assert!(bp.locations().covers_in(19, 42, ROOT_CONTEXT));

    // もう一度流しても増えない
    let again = registry
        .propagate(&mut s, &cache, &settings, ROOT_CONTEXT)
        .unwrap();
    assert!(again.is_empty());
    assert_eq!(registry.get(id).unwrap().locations().len(), 2);
}

#[test]
fn test_propagation_skips_single_unit_and_non_propagable() {
    let (mut s, mut cache, mut registry, settings) = base();

    match registry
        .create(&mut s, &cache, &settings, 7, 42, ROOT_CONTEXT, false, "#7:42")
        .unwrap()
    {
        BreakCreation::Created { .. } => {}
        other => panic!("expected Created, got {other:?}"),
    }

    s.load_unit(ROOT_CONTEXT, "second.unit", vec![timer_module(19)]);
    cache.refresh(&s).unwrap();

    let reports = registry
        .propagate(&mut s, &cache, &settings, ROOT_CONTEXT)
        .unwrap();
    assert!(reports.is_empty());
}

#[test]
fn test_propagation_reports_in_progress_unit() {
    let (mut s, mut cache, mut registry, settings) = base();

    let id = match registry
        .create(&mut s, &cache, &settings, 7, 42, ROOT_CONTEXT, true, "#7:42")
        .unwrap()
    {
        BreakCreation::Created { id, .. } => id,
        other => panic!("expected Created, got {other:?}"),
    };

    s.load_unit_incomplete(ROOT_CONTEXT, "second.unit", vec![timer_module(19)]);
    cache.refresh(&s).unwrap();

    let reports = registry
        .propagate(&mut s, &cache, &settings, ROOT_CONTEXT)
        .unwrap();
    assert_eq!(reports, vec![Propagation::Skipped { id }]);
    assert_eq!(registry.get(id).unwrap().locations().len(), 1);

    s.complete_unit("second.unit");
    let reports = registry
        .propagate(&mut s, &cache, &settings, ROOT_CONTEXT)
        .unwrap();
    assert_eq!(
        reports,
        vec![Propagation::Added {
            id,
            location: Location::new(19, 42, ROOT_CONTEXT),
        }]
    );
}

#[test]
fn test_enable_in_non_active_context_swaps_suspends_and_restores() {
    let (mut s, mut cache, mut registry, settings) = base();

    // コンテキスト2は実行中のまま、そのユニットに直接ブレークポイントを作る
    s.add_context(2);
    s.load_unit(2, "worker.unit", vec![module(30, "app.worker", "Job.ext", 80)]);
    while s.next_event().is_some() {}
    cache.refresh(&s).unwrap();
    s.suspend_log.clear();
    s.resume_log.clear();

    let id = match registry
        .create(&mut s, &cache, &settings, 30, 3, 2, true, "#30:3")
        .unwrap()
    {
        BreakCreation::Created { id, .. } => id,
        other => panic!("expected Created, got {other:?}"),
    };

    // 切り替え・中断・アーム・再開・復帰の一連の手順が踏まれている
    assert!(s.is_armed(&Location::new(30, 3, 2)));
    assert_eq!(s.suspend_log, vec![2]);
    assert_eq!(s.resume_log, vec![2]);
    assert_eq!(s.active_context(), ROOT_CONTEXT);
    assert!(!s.is_suspended(2).unwrap());

    // 無効化も同じ手順でディスアームする
    registry.disable(&mut s, &settings, id).unwrap();
    assert!(!s.is_armed(&Location::new(30, 3, 2)));
    assert_eq!(s.suspend_log, vec![2, 2]);
    assert_eq!(s.resume_log, vec![2, 2]);
    assert_eq!(s.active_context(), ROOT_CONTEXT);

    // 既に中断しているコンテキストは再開しない
    s.suspend(2).unwrap();
    let worked = registry
        .enable(&mut s, &settings, id, EnableMode::Normal)
        .unwrap();
    assert!(worked);
    assert!(s.is_armed(&Location::new(30, 3, 2)));
    assert_eq!(s.resume_log, vec![2, 2]);
    assert!(s.is_suspended(2).unwrap());
    assert_eq!(s.active_context(), ROOT_CONTEXT);
}

#[test]
fn test_demote_for_disconnect_keeps_source_text() {
    let (mut s, cache, mut registry, settings) = base();

    let id = match registry
        .create(&mut s, &cache, &settings, 7, 42, ROOT_CONTEXT, true, "Timer.ext:42")
        .unwrap()
    {
        BreakCreation::Created { id, .. } => id,
        other => panic!("expected Created, got {other:?}"),
    };

    registry.demote_for_disconnect();
    let bp = registry.get(id).unwrap();
    assert_eq!(bp.status(), BreakStatus::Unresolved);
    assert!(bp.locations().is_empty());
    assert_eq!(bp.source_text, "Timer.ext:42");
}
