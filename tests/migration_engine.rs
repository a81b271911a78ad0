//! Migration engine behavior against scripted tenants and steps. No live
//! database is needed: the catalog and steps are mocked at the trait seams
//! and the pool handle is built lazily.

use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use milknet::migrate::{
    CheckOutcome, EngineError, MigrationEngine, MigrationRun, MigrationStep, StepError,
    StepStatus, TenantTarget,
};
use milknet::tenant::directory::{DirectoryError, TenantCatalog, TenantRef};
use milknet::tenant::TenantSchemaId;

struct StaticCatalog {
    tenants: Vec<TenantRef>,
    provisioned: HashSet<String>,
    probe_delay: HashMap<String, Duration>,
}

impl StaticCatalog {
    fn new(schemas: &[&str], provisioned: &[&str]) -> Self {
        let tenants = schemas
            .iter()
            .map(|s| TenantRef {
                account_id: Uuid::new_v4(),
                display_name: s.to_string(),
                schema: TenantSchemaId::parse(s).unwrap(),
            })
            .collect();
        Self {
            tenants,
            provisioned: provisioned.iter().map(|s| s.to_string()).collect(),
            probe_delay: HashMap::new(),
        }
    }

    fn slow_probe_on(mut self, schema: &str, delay: Duration) -> Self {
        self.probe_delay.insert(schema.to_string(), delay);
        self
    }
}

#[async_trait]
impl TenantCatalog for StaticCatalog {
    async fn list_tenants(&self) -> Result<Vec<TenantRef>, DirectoryError> {
        Ok(self.tenants.clone())
    }

    async fn schema_exists(&self, id: &TenantSchemaId) -> Result<bool, sqlx::Error> {
        if let Some(delay) = self.probe_delay.get(id.as_str()) {
            tokio::time::sleep(*delay).await;
        }
        Ok(self.provisioned.contains(id.as_str()))
    }
}

/// A step whose per-schema state lives in a shared map, so tests can seed
/// "already applied" tenants and inspect what happened.
#[derive(Clone)]
struct TestStep {
    id: String,
    applied: Arc<Mutex<HashSet<String>>>,
    lagging: HashSet<String>,
    fail_apply: HashSet<String>,
    delay_on: HashMap<String, Duration>,
    malformed: bool,
}

impl TestStep {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            applied: Arc::new(Mutex::new(HashSet::new())),
            lagging: HashSet::new(),
            fail_apply: HashSet::new(),
            delay_on: HashMap::new(),
            malformed: false,
        }
    }

    fn already_applied_on(self, schema: &str) -> Self {
        self.applied.lock().unwrap().insert(schema.to_string());
        self
    }

    fn lagging_on(mut self, schema: &str) -> Self {
        self.lagging.insert(schema.to_string());
        self
    }

    fn failing_on(mut self, schema: &str) -> Self {
        self.fail_apply.insert(schema.to_string());
        self
    }

    fn slow_on(mut self, schema: &str, delay: Duration) -> Self {
        self.delay_on.insert(schema.to_string(), delay);
        self
    }

    fn malformed(mut self) -> Self {
        self.malformed = true;
        self
    }

    fn applied_schemas(&self) -> HashSet<String> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl MigrationStep for TestStep {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        "scripted test step"
    }

    async fn check(&self, target: &TenantTarget) -> Result<CheckOutcome, StepError> {
        if self.malformed {
            return Err(StepError::Contract(format!("step {} is malformed", self.id)));
        }
        let schema = target.schema.as_str();
        if self.lagging.contains(schema) {
            return Ok(CheckOutcome::SchemaLagging("base table missing".to_string()));
        }
        if self.applied.lock().unwrap().contains(schema) {
            Ok(CheckOutcome::AlreadyApplied)
        } else {
            Ok(CheckOutcome::NotApplied)
        }
    }

    async fn apply(&self, target: &TenantTarget) -> Result<(), StepError> {
        let schema = target.schema.as_str().to_string();
        if let Some(delay) = self.delay_on.get(&schema) {
            tokio::time::sleep(*delay).await;
        }
        if self.fail_apply.contains(&schema) {
            return Err(StepError::UnexpectedState(format!(
                "farmers.machine_id exists with type \"text\" in {}",
                schema
            )));
        }
        self.applied.lock().unwrap().insert(schema);
        Ok(())
    }
}

fn engine(catalog: StaticCatalog) -> MigrationEngine {
    let pool = PgPool::connect_lazy("postgres://localhost/milknet_test").unwrap();
    MigrationEngine::new(Arc::new(catalog), pool).with_concurrency(4)
}

fn boxed(steps: Vec<TestStep>) -> Vec<Box<dyn MigrationStep>> {
    steps.into_iter().map(|s| Box::new(s) as Box<dyn MigrationStep>).collect()
}

fn status_of(run: &MigrationRun, schema: &str, step_id: &str) -> StepStatus {
    run.outcomes
        .iter()
        .find(|o| o.tenant.as_str() == schema && o.step_id == step_id)
        .unwrap_or_else(|| panic!("no outcome for ({}, {})", schema, step_id))
        .status
}

#[tokio::test]
async fn second_run_is_a_no_op() {
    let schemas = ["acme_a1", "bell_b2"];
    let steps = vec![TestStep::new("0001_one"), TestStep::new("0002_two")];
    let engine = engine(StaticCatalog::new(&schemas, &schemas));
    let boxed_steps = boxed(steps);

    let first = engine.run(&boxed_steps).await.unwrap();
    assert_eq!(first.count(StepStatus::Applied), 4);
    assert_eq!(first.count(StepStatus::Failed), 0);

    let second = engine.run(&boxed_steps).await.unwrap();
    assert_eq!(second.count(StepStatus::Applied), 0);
    assert_eq!(second.count(StepStatus::Skipped), 4);
}

#[tokio::test]
async fn unprovisioned_schema_is_skipped_for_every_step() {
    let engine = engine(StaticCatalog::new(&["acme_a1", "ghost_g9"], &["acme_a1"]));
    let boxed_steps = boxed(vec![TestStep::new("0001_one"), TestStep::new("0002_two")]);

    let run = engine.run(&boxed_steps).await.unwrap();
    for step_id in ["0001_one", "0002_two"] {
        assert_eq!(status_of(&run, "ghost_g9", step_id), StepStatus::Skipped);
        assert_eq!(status_of(&run, "acme_a1", step_id), StepStatus::Applied);
    }
    assert_eq!(run.count(StepStatus::Failed), 0);
}

#[tokio::test]
async fn one_tenants_failure_blocks_nothing_else() {
    let schemas = ["acme_a1", "bell_b2"];
    let step_one = TestStep::new("0001_one").failing_on("acme_a1");
    let step_two = TestStep::new("0002_two");
    let engine = engine(StaticCatalog::new(&schemas, &schemas));

    let run = engine
        .run(&boxed(vec![step_one.clone(), step_two.clone()]))
        .await
        .unwrap();

    // Failed on A for step one, with the diagnostic detail preserved.
    assert_eq!(status_of(&run, "acme_a1", "0001_one"), StepStatus::Failed);
    let failed: Vec<_> = run.failed().collect();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].detail.as_deref().unwrap().contains("machine_id"));

    // Same step still applied on B; later step still applied on A.
    assert_eq!(status_of(&run, "bell_b2", "0001_one"), StepStatus::Applied);
    assert_eq!(status_of(&run, "acme_a1", "0002_two"), StepStatus::Applied);
    assert!(step_two.applied_schemas().contains("acme_a1"));
}

#[tokio::test]
async fn add_column_rollout_across_mixed_tenants() {
    // One tenant already has the column, one is missing only the column,
    // one has no schema at all.
    let step = TestStep::new("0003_farmers_machine_id").already_applied_on("done_d1");
    let engine = engine(StaticCatalog::new(
        &["done_d1", "pending_p2", "absent_a3"],
        &["done_d1", "pending_p2"],
    ));

    let run = engine.run(&boxed(vec![step])).await.unwrap();
    assert_eq!(status_of(&run, "done_d1", "0003_farmers_machine_id"), StepStatus::Skipped);
    assert_eq!(status_of(&run, "pending_p2", "0003_farmers_machine_id"), StepStatus::Applied);
    assert_eq!(status_of(&run, "absent_a3", "0003_farmers_machine_id"), StepStatus::Skipped);
}

#[tokio::test]
async fn lagging_base_table_is_skipped_not_failed() {
    let schemas = ["old_o1", "new_n2"];
    let step = TestStep::new("0004_backfill").lagging_on("old_o1");
    let engine = engine(StaticCatalog::new(&schemas, &schemas));

    let run = engine.run(&boxed(vec![step])).await.unwrap();
    assert_eq!(status_of(&run, "old_o1", "0004_backfill"), StepStatus::Skipped);
    assert_eq!(status_of(&run, "new_n2", "0004_backfill"), StepStatus::Applied);
}

#[tokio::test]
async fn slow_tenant_times_out_without_affecting_siblings() {
    let schemas = ["slow_s1", "fast_f2"];
    let step = TestStep::new("0001_one").slow_on("slow_s1", Duration::from_secs(5));
    let engine = engine(StaticCatalog::new(&schemas, &schemas))
        .with_tenant_timeout(Duration::from_millis(100));

    let run = engine.run(&boxed(vec![step])).await.unwrap();
    assert_eq!(status_of(&run, "slow_s1", "0001_one"), StepStatus::Failed);
    let outcome = run.failed().next().unwrap();
    assert!(outcome.detail.as_deref().unwrap().contains("timed out"));
    assert_eq!(status_of(&run, "fast_f2", "0001_one"), StepStatus::Applied);
}

#[tokio::test]
async fn stalled_existence_probe_counts_against_the_tenant_deadline() {
    let schemas = ["slow_s1", "fast_f2"];
    let step = TestStep::new("0001_one");
    let catalog = StaticCatalog::new(&schemas, &schemas)
        .slow_probe_on("slow_s1", Duration::from_secs(5));
    let engine = engine(catalog).with_tenant_timeout(Duration::from_millis(100));

    let start = std::time::Instant::now();
    let run = engine.run(&boxed(vec![step.clone()])).await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(2));

    assert_eq!(status_of(&run, "slow_s1", "0001_one"), StepStatus::Failed);
    let outcome = run.failed().next().unwrap();
    assert!(outcome.detail.as_deref().unwrap().contains("timed out"));

    // Nothing ran on the stalled tenant; the sibling is untouched.
    assert!(!step.applied_schemas().contains("slow_s1"));
    assert_eq!(status_of(&run, "fast_f2", "0001_one"), StepStatus::Applied);
}

#[tokio::test]
async fn malformed_step_is_fatal() {
    let schemas = ["acme_a1"];
    let engine = engine(StaticCatalog::new(&schemas, &schemas));

    let result = engine.run(&boxed(vec![TestStep::new("0001_bad").malformed()])).await;
    assert!(matches!(result, Err(EngineError::Contract { .. })));
}

#[tokio::test]
async fn status_reports_pending_without_applying() {
    let schemas = ["acme_a1"];
    let step = TestStep::new("0001_one");
    let engine = engine(StaticCatalog::new(&schemas, &schemas));

    let run = engine.status(&boxed(vec![step.clone()])).await.unwrap();
    assert_eq!(status_of(&run, "acme_a1", "0001_one"), StepStatus::Pending);
    assert!(step.applied_schemas().is_empty());
}

#[tokio::test]
async fn outcomes_come_back_in_directory_order() {
    let schemas = ["c_third", "a_first", "b_second"];
    let engine = engine(StaticCatalog::new(&schemas, &schemas));

    let run = engine.run(&boxed(vec![TestStep::new("0001_one")])).await.unwrap();
    let order: Vec<&str> = run.outcomes.iter().map(|o| o.tenant.as_str()).collect();
    assert_eq!(order, vec!["c_third", "a_first", "b_second"]);
}
