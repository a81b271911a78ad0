//! The platform's migration history. Order matters: later steps may build
//! on earlier ones, and the engine applies them strictly in sequence within
//! each tenant.

use super::step::{AddColumnStep, BackfillStep, CreateTableStep, MigrationStep};

pub fn builtin_steps() -> Vec<Box<dyn MigrationStep>> {
    vec![
        Box::new(CreateTableStep::new(
            "0001_chart_downloads",
            "Create per-machine rate chart download history",
            "chart_downloads",
            "machine_id uuid NOT NULL, \
             chart_id bigint NOT NULL, \
             channel text NOT NULL, \
             downloaded_at timestamp NOT NULL DEFAULT now(), \
             PRIMARY KEY (machine_id, chart_id, channel)",
        )),
        Box::new(AddColumnStep::new(
            "0002_rate_charts_shared_chart_id",
            "Track share pointers between rate charts",
            "rate_charts",
            "shared_chart_id",
            "bigint",
            "bigint",
        )),
        Box::new(AddColumnStep::new(
            "0003_farmers_machine_id",
            "Link each farmer to the collection machine that serves them",
            "farmers",
            "machine_id",
            "uuid",
            "uuid",
        )),
        Box::new(BackfillStep::new(
            "0004_farmers_contact_normalize",
            "Normalize stored farmer contact addresses to trimmed lower-case",
            "farmers",
            "contact_address = lower(btrim(contact_address))",
            "contact_address <> lower(btrim(contact_address))",
        )),
        Box::new(BackfillStep::new(
            "0005_societies_contact_normalize",
            "Normalize stored society contact addresses to trimmed lower-case",
            "societies",
            "contact_address = lower(btrim(contact_address))",
            "contact_address <> lower(btrim(contact_address))",
        )),
    ]
}
