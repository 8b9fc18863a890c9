//! Integration tests for the ingestion pipeline
//!
//! Drives full addon dumps through [`Ingestor`] for both addon variants and
//! checks the resulting tenant store through its public query surface.

use tokio::sync::mpsc;
use wdkp_common::ingest::{AddonVariant, BuildError, IngestEvent, IngestSettings, Ingestor, Stage};
use wdkp_common::model::DEFAULT_TEAM;
use wdkp_common::store::{StoreError, TenantStore, UploadMetadata};

const NOW: i64 = 1_700_000_000;

const MONOLITH_DUMP: &str = r#"
MonDKP_DB = {
	["modes"] = {
		["rounding"] = 1,
		["mode"] = "Minimum Bid Values",
	},
	["bossargs"] = {
		["CurrentRaidZone"] = "Molten Core",
	},
}
MonDKP_DKPTable = {
	{
		["player"] = "Thrall",
		["dkp"] = 120.5,
		["lifetime_gained"] = 300,
		["lifetime_spent"] = -180,
		["class"] = "SHAMAN",
		["role"] = "Healer",
		["spec"] = "Restoration (0/5/46)",
		["rank"] = "Officer",
	}, -- [1]
	{
		["player"] = "Jaina",
		["dkp"] = 80,
		["lifetime_gained"] = 110,
		["lifetime_spent"] = -30,
		["class"] = "MAGE",
	}, -- [2]
	{
		["player"] = "Varian",
		["dkp"] = 200,
		["lifetime_gained"] = 200,
		["lifetime_spent"] = 0,
		["class"] = "WARRIOR",
		["role"] = "Tank",
	}, -- [3]
	{
		["player"] = "Garrosh",
		["dkp"] = 200,
		["lifetime_gained"] = 250,
		["lifetime_spent"] = -50,
		["class"] = "warrior",
	}, -- [4]
	{
		["player"] = "Broken",
	}, -- [5]
}
MonDKP_Loot = {
	{
		["player"] = "Thrall",
		["loot"] = "|cffff8000|Hitem:19019::::::::60:::::|h[Thunderfury, Blessed Blade of the Windseeker]|h|r",
		["cost"] = -50,
		["date"] = 1699000000,
		["boss"] = "Baron Geddon",
		["zone"] = "Molten Core",
	}, -- [1]
	{
		["player"] = "Jaina",
		["loot"] = "|cffa335ee|Hitem:16914::::::::60:::::|h[Netherwind Crown]|h|r",
		["cost"] = -30,
		["date"] = 1699500000,
	}, -- [2]
	{
		["player"] = "Ghost",
		["loot"] = "|cffa335ee|Hitem:16915::::::::60:::::|h[Netherwind Pants]|h|r",
		["cost"] = -30,
		["date"] = 1699600000,
	}, -- [3]
}
MonDKP_DKPHistory = {
	{
		["players"] = "Thrall,Jaina,",
		["dkp"] = 10,
		["date"] = 1699999000,
		["reason"] = 2,
		["index"] = "Varian-1699999000",
	}, -- [1]
	{
		["players"] = "Thrall,",
		["dkp"] = 5,
		["date"] = 1699998000,
		["reason"] = "Raid attendance",
		["index"] = "Varian-1699998000",
	}, -- [2]
	{
		["players"] = "Thrall,Jaina,Ghost,",
		["dkp"] = "-5,-3,-1,",
		["date"] = 1699999500,
		["reason"] = 6,
		["officer"] = "Garrosh",
	}, -- [3]
	{
		["players"] = "Thrall,Jaina,",
		["dkp"] = "-10%",
		["date"] = 1699999900,
		["reason"] = "Weekly Decay",
	}, -- [4]
}
"#;

const COMMUNITY_DUMP: &str = r#"
CommDKP_DB = {
	["0"] = {
		["modes"] = {
			["rounding"] = 0,
		},
	},
	["1"] = {
		["modes"] = {
			["rounding"] = 2,
		},
	},
	["defaults"] = {
		["HistoryLimit"] = 2500,
	},
}
CommDKP_DKPTable = {
	["0"] = {
		{
			["player"] = "Thrall",
			["dkp"] = 50.4,
			["lifetime_gained"] = 60,
			["lifetime_spent"] = -10,
			["class"] = "SHAMAN",
		},
	},
	["1"] = {
		{
			["player"] = "Thrall",
			["dkp"] = 12.257,
			["lifetime_gained"] = 20,
			["lifetime_spent"] = 0,
			["class"] = "SHAMAN",
		},
		{
			["player"] = "Sylvanas",
			["dkp"] = 40,
			["lifetime_gained"] = 40,
			["lifetime_spent"] = 0,
			["class"] = "HUNTER",
		},
	},
}
CommDKP_Loot = {
	["0"] = {
		{
			["player"] = "Thrall",
			["loot"] = "|cffa335ee|Hitem:17182::|h[Sulfuras, Hand of Ragnaros]|h|r",
			["cost"] = 40,
			["date"] = 1699000000,
		},
	},
	["5"] = {
		{
			["player"] = "Thrall",
			["loot"] = "Plain Text Item",
			["cost"] = 1,
			["date"] = 1699000000,
		},
	},
}
CommDKP_DKPHistory = {
	["0"] = {
	},
	["1"] = {
		{
			["players"] = "Sylvanas,",
			["dkp"] = 20,
			["date"] = 1699990000,
			["reason"] = 1,
			["index"] = "Thrall-1699990000",
		},
		{
			["players"] = "Sylvanas,",
			["dkp"] = 20,
			["date"] = 1699980000,
			["reason"] = 3,
			["index"] = "Thrall-1699980000",
		},
	},
}
"#;

fn upload(comment: &str) -> UploadMetadata {
    UploadMetadata {
        comment: comment.to_string(),
        date: "2023-11-14".to_string(),
        author: "Varian".to_string(),
    }
}

fn monolith() -> Ingestor {
    Ingestor::new(AddonVariant::Monolith.strategy(), IngestSettings::default())
}

fn community() -> Ingestor {
    Ingestor::new(AddonVariant::Community.strategy(), IngestSettings::default())
}

async fn ingested_monolith() -> TenantStore {
    let mut store = TenantStore::new();
    monolith()
        .build_at(&mut store, MONOLITH_DUMP, upload("weekly"), NOW)
        .await
        .unwrap();
    store
}

// ============================================================================
// Monolith
// ============================================================================

#[tokio::test]
async fn test_monolith_report_counts() {
    let mut store = TenantStore::new();
    let report = monolith()
        .build_at(&mut store, MONOLITH_DUMP, upload("weekly"), NOW)
        .await
        .unwrap();

    assert_eq!(report.variant, "monolith");
    assert_eq!(report.variables, 4);
    assert_eq!(report.teams, 1);
    assert_eq!((report.standings.accepted, report.standings.skipped), (4, 1));
    assert_eq!((report.loot.accepted, report.loot.skipped), (2, 1));
    // Ghost is skipped once, the decay record once
    assert_eq!((report.history.accepted, report.history.skipped), (5, 2));
}

#[tokio::test]
async fn test_monolith_standings() {
    let store = ingested_monolith().await;

    let thrall = store.get_standing(None, "THRALL").unwrap().unwrap();
    assert_eq!(thrall.points, 120.5);
    assert_eq!(thrall.lifetime_spent, 180.0);
    assert_eq!(thrall.class, "SHAMAN");
    assert_eq!(thrall.rank.as_deref(), Some("Officer"));

    assert!(store.get_standing(None, "Broken").unwrap().is_none());
    assert_eq!(store.list_team_standings(None).unwrap().len(), 4);
    assert_eq!(store.config().rounding_for(DEFAULT_TEAM), 1);
}

#[tokio::test]
async fn test_monolith_loot_newest_first() {
    let store = ingested_monolith().await;

    let loot = store.loot(None).unwrap();
    let names: Vec<&str> = loot.iter().map(|l| l.item_name.as_str()).collect();
    assert_eq!(names, vec!["Netherwind Crown", "Thunderfury, Blessed Blade of the Windseeker"]);

    let found = store.find_loot_by_name(None, "thunder").unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].item_id, 19019);
    assert_eq!(found[0].cost, 50.0);
    assert_eq!(found[0].boss.as_deref(), Some("Baron Geddon"));

    let latest = store.latest_loot(None, "Thrall").unwrap().unwrap();
    assert_eq!(latest.item_id, 19019);
    assert!(store.latest_loot(None, "Varian").unwrap().is_none());
}

#[tokio::test]
async fn test_monolith_history_and_activity() {
    let store = ingested_monolith().await;

    let history = store.player_history(None, "Thrall").unwrap();
    let deltas: Vec<f64> = history.iter().map(|h| h.delta).collect();
    assert_eq!(deltas, vec![-5.0, 10.0, 5.0]);
    assert_eq!(history[0].officer, "Garrosh");
    assert_eq!(history[0].reason, "DKP Adjust");

    let latest = store.latest_history(None, "Thrall").unwrap().unwrap();
    assert_eq!(latest.delta, 10.0);
    assert_eq!(latest.reason, "Boss Kill Bonus");
    assert_eq!(latest.officer, "Varian");

    // Thrall has two recent positive entries, Jaina only one
    assert!(store.get_standing(None, "Thrall").unwrap().unwrap().active);
    assert!(!store.get_standing(None, "Jaina").unwrap().unwrap().active);

    let active = store.active_standings(None).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].name, "Thrall");

    assert!(store.player_history(None, "Ghost").unwrap().is_empty());
}

#[tokio::test]
async fn test_monolith_groups_sorted() {
    let store = ingested_monolith().await;

    let warriors: Vec<&str> = store
        .get_group(None, "Warrior")
        .unwrap()
        .iter()
        .map(|s| s.name.as_str())
        .collect();
    // Equal balances fall back to name order
    assert_eq!(warriors, vec!["Garrosh", "Varian"]);
    assert_eq!(store.get_group(None, "SHAMAN").unwrap().len(), 1);
    assert!(store.get_group(None, "PRIEST").unwrap().is_empty());
}

#[tokio::test]
async fn test_reingest_is_idempotent() {
    let ingestor = monolith();
    let mut first = TenantStore::new();
    ingestor
        .build_at(&mut first, MONOLITH_DUMP, upload("weekly"), NOW)
        .await
        .unwrap();

    let mut second = first.clone();
    ingestor
        .build_at(&mut second, MONOLITH_DUMP, upload("weekly"), NOW)
        .await
        .unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_comment_truncated() {
    let settings = IngestSettings {
        comment_max_chars: 5,
        ..IngestSettings::default()
    };
    let ingestor = Ingestor::new(AddonVariant::Monolith.strategy(), settings);
    let mut store = TenantStore::new();
    ingestor
        .build_at(&mut store, MONOLITH_DUMP, upload("Molten Core clear"), NOW)
        .await
        .unwrap();

    let metadata = store.metadata().unwrap();
    assert_eq!(metadata.upload.comment, "Molte");
    assert_eq!(metadata.upload.author, "Varian");
    assert_eq!(metadata.ingested_at, NOW);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_missing_standings_clears_store() {
    let mut store = ingested_monolith().await;
    let text = "MonDKP_DB = {\n\t[\"modes\"] = {\n\t},\n}\n";

    let err = monolith()
        .build_at(&mut store, text, upload(""), NOW)
        .await
        .unwrap_err();

    assert!(matches!(err, BuildError::Standings(_)));
    assert!(store.is_empty());
    assert!(matches!(
        store.get_standing(None, "Thrall"),
        Err(StoreError::UnknownTeam(_))
    ));
}

#[tokio::test]
async fn test_unparseable_upload_keeps_store() {
    let mut store = ingested_monolith().await;
    let before = store.clone();

    let err = monolith()
        .build_at(&mut store, "this is not a saved variables file", upload(""), NOW)
        .await
        .unwrap_err();

    assert!(matches!(err, BuildError::Parse(_)));
    assert_eq!(err.stage(), Stage::Parse);
    assert_eq!(store, before);
}

#[tokio::test]
async fn test_wrong_variant_fails_at_config() {
    let (tx, mut rx) = mpsc::channel(16);
    let mut store = TenantStore::new();
    let err = community()
        .with_events(tx)
        .build_at(&mut store, MONOLITH_DUMP, upload(""), NOW)
        .await
        .unwrap_err();

    assert!(matches!(err, BuildError::Config(_)));
    match rx.recv().await {
        Some(IngestEvent::Failed { stage, .. }) => assert_eq!(stage, Stage::Config),
        other => panic!("unexpected event: {:?}", other),
    }
}

/// Drop one top-level variable from the monolith fixture
fn monolith_without(variable: &str) -> String {
    let start = MONOLITH_DUMP.find(&format!("{} = {{", variable)).unwrap();
    let end = start + MONOLITH_DUMP[start..].find("\n}\n").unwrap() + 3;
    format!("{}{}", &MONOLITH_DUMP[..start], &MONOLITH_DUMP[end..])
}

fn drain_failure(rx: &mut mpsc::Receiver<IngestEvent>) -> Option<Stage> {
    let mut failed = None;
    while let Ok(event) = rx.try_recv() {
        if let IngestEvent::Failed { stage, .. } = event {
            failed = Some(stage);
        }
    }
    failed
}

#[tokio::test]
async fn test_missing_loot_clears_store() {
    let text = monolith_without("MonDKP_Loot");
    let (tx, mut rx) = mpsc::channel(16);
    let mut store = ingested_monolith().await;

    let err = monolith()
        .with_events(tx)
        .build_at(&mut store, &text, upload(""), NOW)
        .await
        .unwrap_err();

    assert!(matches!(err, BuildError::Loot(_)));
    assert_eq!(err.stage(), Stage::Loot);
    assert!(store.is_empty());
    assert_eq!(drain_failure(&mut rx), Some(Stage::Loot));
}

#[tokio::test]
async fn test_missing_history_clears_store() {
    let text = monolith_without("MonDKP_DKPHistory");
    let (tx, mut rx) = mpsc::channel(16);
    let mut store = ingested_monolith().await;

    let err = monolith()
        .with_events(tx)
        .build_at(&mut store, &text, upload(""), NOW)
        .await
        .unwrap_err();

    assert!(matches!(err, BuildError::History(_)));
    assert_eq!(err.stage(), Stage::History);
    assert!(store.is_empty());
    assert_eq!(drain_failure(&mut rx), Some(Stage::History));
}

#[tokio::test]
async fn test_non_finite_amounts_skipped_and_snapshot_restores() {
    let text = r#"
MonDKP_DB = {
	["modes"] = {
		["rounding"] = 0,
	},
}
MonDKP_DKPTable = {
	{
		["player"] = "Thrall",
		["dkp"] = 1e999,
		["lifetime_gained"] = 1,
		["lifetime_spent"] = 0,
		["class"] = "SHAMAN",
	},
	{
		["player"] = "Jaina",
		["dkp"] = 40,
		["lifetime_gained"] = 1e308,
		["lifetime_spent"] = 0,
		["class"] = "MAGE",
	},
}
MonDKP_Loot = {
	{
		["player"] = "Jaina",
		["loot"] = "Rod",
		["cost"] = -1e999,
		["date"] = 1699000000,
	},
}
MonDKP_DKPHistory = {
	{
		["players"] = "Jaina,",
		["dkp"] = "NaN",
		["date"] = 1699999000,
	},
	{
		["players"] = "Jaina,",
		["dkp"] = 10,
		["date"] = 1699999500,
	},
}
"#;
    let mut store = TenantStore::new();
    let report = monolith()
        .build_at(&mut store, text, upload(""), NOW)
        .await
        .unwrap();

    assert_eq!((report.standings.accepted, report.standings.skipped), (1, 1));
    assert_eq!((report.loot.accepted, report.loot.skipped), (0, 1));
    assert_eq!((report.history.accepted, report.history.skipped), (1, 1));
    assert!(store.get_standing(None, "Thrall").unwrap().is_none());
    assert_eq!(store.get_standing(None, "Jaina").unwrap().unwrap().lifetime_gained, 1e308);

    let bytes = store.serialize_snapshot().unwrap();
    let restored = TenantStore::restore_snapshot(&bytes).unwrap();
    assert_eq!(restored, store);
}

// ============================================================================
// Community
// ============================================================================

#[tokio::test]
async fn test_community_teams_are_isolated() {
    let mut store = TenantStore::new();
    let report = community()
        .build_at(&mut store, COMMUNITY_DUMP, upload(""), NOW)
        .await
        .unwrap();

    assert_eq!(report.teams, 2);
    assert_eq!(store.teams().collect::<Vec<_>>(), vec!["0", "1"]);

    // Per-team rounding
    let team0 = store.get_standing(Some("0"), "Thrall").unwrap().unwrap();
    assert_eq!(team0.points, 50.0);
    let team1 = store.get_standing(Some("1"), "Thrall").unwrap().unwrap();
    assert_eq!(team1.points, 12.26);

    assert!(store.get_standing(Some("0"), "Sylvanas").unwrap().is_none());
    assert!(matches!(
        store.get_standing(None, "Thrall"),
        Err(StoreError::UnknownTeam(team)) if team == DEFAULT_TEAM
    ));
    assert!(matches!(
        store.list_team_standings(Some("5")),
        Err(StoreError::UnknownTeam(_))
    ));
}

#[tokio::test]
async fn test_community_skips_unknown_team_tables() {
    let mut store = TenantStore::new();
    let report = community()
        .build_at(&mut store, COMMUNITY_DUMP, upload(""), NOW)
        .await
        .unwrap();

    assert_eq!((report.loot.accepted, report.loot.skipped), (1, 1));
    assert_eq!(store.loot(Some("0")).unwrap()[0].item_name, "Sulfuras, Hand of Ragnaros");
    assert!(store.loot(Some("1")).unwrap().is_empty());
}

#[tokio::test]
async fn test_community_history_per_team() {
    let mut store = TenantStore::new();
    community()
        .build_at(&mut store, COMMUNITY_DUMP, upload(""), NOW)
        .await
        .unwrap();

    let history = store.player_history(Some("1"), "Sylvanas").unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].reason, "On Time Bonus");
    assert_eq!(history[1].reason, "Raid Completion Bonus");
    assert_eq!(history[0].officer, "Thrall");

    assert!(store.get_standing(Some("1"), "Sylvanas").unwrap().unwrap().active);
    assert!(!store.get_standing(Some("0"), "Thrall").unwrap().unwrap().active);
}

#[tokio::test]
async fn test_snapshot_round_trip_after_ingest() {
    let store = ingested_monolith().await;
    let bytes = store.serialize_snapshot().unwrap();
    let restored = TenantStore::restore_snapshot(&bytes).unwrap();
    assert_eq!(restored, store);
    assert_eq!(
        restored.get_group(None, "WARRIOR").unwrap().len(),
        store.get_group(None, "WARRIOR").unwrap().len()
    );
}
