//! Scenario tests for the injector state machine.
//!
//! Each test drives `Injector::handle` frame by frame, playing both the
//! client and the server, and asserts on the exact frames the injector
//! decides to emit on each side.

use bytes::{BufMut, BytesMut};
use electric_core::{FeatureFlags, TableName};
use electric_policy::Rules;
use electric_proxy::generator::{QueryGenerator, StandardQueryGenerator};
use electric_proxy::injector::{Injector, Reaction, Source};
use electric_wire::backend::{self, TxStatus};
use electric_wire::frame::tag;
use electric_wire::{Frame, FrontendView, frontend};
use std::collections::HashSet;
use std::sync::Arc;

const TEST_VERSION: &str = "20230921111222333";

/// A query generator with a fixed version stamp, so commit-time SQL is
/// predictable.
struct TestGenerator(StandardQueryGenerator);

impl QueryGenerator for TestGenerator {
    fn electrified_query(&self) -> String {
        self.0.electrified_query()
    }
    fn load_rules_query(&self) -> String {
        self.0.load_rules_query()
    }
    fn capture_version_query(&self, version: &str) -> String {
        self.0.capture_version_query(version)
    }
    fn save_rules_query(&self, rules: &Rules) -> String {
        self.0.save_rules_query(rules)
    }
    fn generate_version(&self) -> String {
        TEST_VERSION.to_string()
    }
}

fn injector_with(electrified: &[&str]) -> Injector {
    let tables: HashSet<TableName> = electrified
        .iter()
        .map(|name| TableName::public(*name))
        .collect();
    Injector::new(
        FeatureFlags::new(),
        Rules::new(),
        tables,
        Arc::new(TestGenerator(StandardQueryGenerator)),
    )
}

fn client(injector: &mut Injector, frame: Frame) -> Reaction {
    injector.handle(Source::Client, frame)
}

fn server(injector: &mut Injector, frame: Frame) -> Reaction {
    injector.handle(Source::Server, frame)
}

// ---------------------------------------------------------------------
// Frame builders
// ---------------------------------------------------------------------

fn query(sql: &str) -> Frame {
    frontend::query(sql)
}

fn parse_msg(statement: &str, sql: &str) -> Frame {
    let mut payload = BytesMut::new();
    payload.put_slice(statement.as_bytes());
    payload.put_u8(0);
    payload.put_slice(sql.as_bytes());
    payload.put_u8(0);
    payload.put_u16(0);
    Frame::new(tag::PARSE, payload.freeze())
}

fn bind_msg(portal: &str, statement: &str) -> Frame {
    let mut payload = BytesMut::new();
    payload.put_slice(portal.as_bytes());
    payload.put_u8(0);
    payload.put_slice(statement.as_bytes());
    payload.put_u8(0);
    payload.put_u16(0);
    payload.put_u16(0);
    payload.put_u16(0);
    Frame::new(tag::BIND, payload.freeze())
}

fn execute_msg(portal: &str) -> Frame {
    let mut payload = BytesMut::new();
    payload.put_slice(portal.as_bytes());
    payload.put_u8(0);
    payload.put_i32(0);
    Frame::new(tag::EXECUTE, payload.freeze())
}

fn sync_msg() -> Frame {
    Frame::empty(tag::SYNC)
}

fn cc(completion_tag: &str) -> Frame {
    backend::command_complete(completion_tag)
}

fn rfq(status: TxStatus) -> Frame {
    backend::ready_for_query(status)
}

fn data_row(value: &str) -> Frame {
    let mut payload = BytesMut::new();
    payload.put_u16(1);
    payload.put_i32(value.len() as i32);
    payload.put_slice(value.as_bytes());
    Frame::new(tag::DATA_ROW, payload.freeze())
}

fn error_response(message: &str) -> Frame {
    backend::error_response("42501", message)
}

fn schema_json(name: &str, electrified: bool) -> String {
    format!(
        r#"{{"schema":"public","name":"{name}","electrified":{electrified},
            "columns":[
              {{"name":"id","data_type":"integer","nullable":false,"default":null}},
              {{"name":"email","data_type":"text","nullable":true,"default":null}},
              {{"name":"owner_id","data_type":"uuid","nullable":true,"default":null}}
            ],
            "primary_key":["id"],"foreign_keys":[]}}"#
    )
}

// ---------------------------------------------------------------------
// Reaction inspection
// ---------------------------------------------------------------------

fn sql_of(frame: &Frame) -> String {
    match FrontendView::decode(frame).unwrap() {
        FrontendView::Query(sql) => sql,
        other => panic!("expected a Query frame, got {other:?}"),
    }
}

fn assert_silent(reaction: &Reaction) {
    assert!(
        reaction.to_client.is_empty() && reaction.to_server.is_empty(),
        "expected no frames, got {reaction:?}"
    );
}

fn assert_forwarded_to_server(reaction: &Reaction, frame: &Frame) {
    assert_eq!(reaction.to_server.len(), 1, "{reaction:?}");
    assert_eq!(
        reaction.to_server[0].to_bytes(),
        frame.to_bytes(),
        "frame was not forwarded byte-identically"
    );
    assert!(reaction.to_client.is_empty(), "{reaction:?}");
}

fn assert_forwarded_to_client(reaction: &Reaction, frame: &Frame) {
    assert_eq!(reaction.to_client.len(), 1, "{reaction:?}");
    assert_eq!(
        reaction.to_client[0].to_bytes(),
        frame.to_bytes(),
        "frame was not forwarded byte-identically"
    );
    assert!(reaction.to_server.is_empty(), "{reaction:?}");
}

fn completion_tags(reaction: &Reaction) -> Vec<String> {
    reaction
        .to_client
        .iter()
        .filter(|f| f.tag == tag::COMMAND_COMPLETE)
        .map(|f| match backend::BackendView::decode(f).unwrap() {
            backend::BackendView::CommandComplete(t) => t,
            _ => unreachable!(),
        })
        .collect()
}

/// Open an explicit transaction over the simple protocol.
fn open_tx(injector: &mut Injector) {
    let begin = query("BEGIN");
    let r = client(injector, begin.clone());
    assert_forwarded_to_server(&r, &begin);
    let r = server(injector, cc("BEGIN"));
    assert_forwarded_to_client(&r, &cc("BEGIN"));
    let r = server(injector, rfq(TxStatus::InTransaction));
    assert_forwarded_to_client(&r, &rfq(TxStatus::InTransaction));
    assert_eq!(injector.tx_status(), TxStatus::InTransaction);
}

/// Feed a complete introspection reply for one table.
fn introspection_reply(injector: &mut Injector, json: &str) -> Reaction {
    let r = server(injector, data_row(json));
    assert_silent(&r);
    let r = server(injector, cc("SELECT 1"));
    assert_silent(&r);
    server(injector, rfq(TxStatus::InTransaction))
}

// ---------------------------------------------------------------------
// S1 — pass-through (adhoc, non-electrified, extended protocol)
// ---------------------------------------------------------------------

#[test]
fn test_s1_passthrough_extended_non_electrified() {
    let mut injector = injector_with(&[]);

    for sql in ["BEGIN", "CREATE TABLE foo(id int)", "COMMIT"] {
        let frames = [
            parse_msg("", sql),
            bind_msg("", ""),
            execute_msg(""),
            sync_msg(),
        ];
        for frame in &frames {
            let r = client(&mut injector, frame.clone());
            assert_forwarded_to_server(&r, frame);
        }

        let completion = match sql {
            "BEGIN" => cc("BEGIN"),
            "COMMIT" => cc("COMMIT"),
            _ => cc("CREATE TABLE"),
        };
        let status = if sql == "COMMIT" {
            TxStatus::Idle
        } else {
            TxStatus::InTransaction
        };
        for frame in [
            Frame::empty(tag::PARSE_COMPLETE),
            Frame::empty(tag::BIND_COMPLETE),
            completion,
            rfq(status),
        ] {
            let r = server(&mut injector, frame.clone());
            assert_forwarded_to_client(&r, &frame);
        }
    }

    assert_eq!(injector.tx_status(), TxStatus::Idle);
    assert!(injector.rules().is_empty());
}

// ---------------------------------------------------------------------
// S2 — electrified migration (manual, simple protocol)
// ---------------------------------------------------------------------

#[test]
fn test_s2_electrified_migration_simple() {
    let mut injector = injector_with(&["users"]);
    open_tx(&mut injector);

    let alter = query("ALTER TABLE users ADD COLUMN email text");
    let r = client(&mut injector, alter.clone());
    assert_forwarded_to_server(&r, &alter);

    let r = server(&mut injector, cc("ALTER TABLE"));
    assert_forwarded_to_client(&r, &cc("ALTER TABLE"));
    let r = server(&mut injector, rfq(TxStatus::InTransaction));
    assert_forwarded_to_client(&r, &rfq(TxStatus::InTransaction));

    // COMMIT is intercepted: version capture first.
    let commit = query("COMMIT");
    let r = client(&mut injector, commit.clone());
    assert!(r.to_client.is_empty());
    assert_eq!(r.to_server.len(), 1);
    let capture = sql_of(&r.to_server[0]);
    assert!(capture.contains("electric.migration_versions"));
    assert!(capture.contains(TEST_VERSION));

    let r = server(&mut injector, cc("INSERT 0 1"));
    assert_silent(&r);
    // Version capture done: the original COMMIT goes through, untouched.
    let r = server(&mut injector, rfq(TxStatus::InTransaction));
    assert_forwarded_to_server(&r, &commit);

    let r = server(&mut injector, cc("COMMIT"));
    assert_forwarded_to_client(&r, &cc("COMMIT"));
    let r = server(&mut injector, rfq(TxStatus::Idle));
    assert_forwarded_to_client(&r, &rfq(TxStatus::Idle));
    assert_eq!(injector.tx_status(), TxStatus::Idle);
}

// ---------------------------------------------------------------------
// S3 — ELECTRIC GRANT (manual, simple protocol)
// ---------------------------------------------------------------------

#[test]
fn test_s3_electric_grant_simple() {
    let mut injector = injector_with(&["projects"]);
    open_tx(&mut injector);

    // The GRANT itself reaches the server zero times; one introspection
    // round-trip goes out instead.
    let r = client(&mut injector, query("ELECTRIC GRANT ALL ON projects TO 'member'"));
    assert!(r.to_client.is_empty());
    assert_eq!(r.to_server.len(), 1);
    let introspection = sql_of(&r.to_server[0]);
    assert!(introspection.contains("pg_catalog.pg_class"));
    assert!(introspection.contains("'projects'"));

    let r = introspection_reply(&mut injector, &schema_json("projects", true));
    assert!(r.to_server.is_empty());
    assert_eq!(completion_tags(&r), vec!["ELECTRIC GRANT"]);
    assert_eq!(
        r.to_client.last().unwrap().to_bytes(),
        rfq(TxStatus::InTransaction).to_bytes()
    );

    // Commit: version capture, then the rules save, then COMMIT.
    let commit = query("COMMIT");
    let r = client(&mut injector, commit.clone());
    assert!(sql_of(&r.to_server[0]).contains("electric.migration_versions"));

    let r = server(&mut injector, cc("INSERT 0 1"));
    assert_silent(&r);
    let r = server(&mut injector, rfq(TxStatus::InTransaction));
    assert_eq!(r.to_server.len(), 1);
    let save = sql_of(&r.to_server[0]);
    assert!(save.contains("electric.permission_rules"));
    assert!(save.contains("member"));

    let r = server(&mut injector, cc("INSERT 0 1"));
    assert_silent(&r);
    let r = server(&mut injector, rfq(TxStatus::InTransaction));
    assert_forwarded_to_server(&r, &commit);

    let r = server(&mut injector, cc("COMMIT"));
    assert_eq!(completion_tags(&r), vec!["COMMIT"]);
    let r = server(&mut injector, rfq(TxStatus::Idle));
    assert_forwarded_to_client(&r, &rfq(TxStatus::Idle));

    // The folded rules became the session's rules: ALL expands to four
    // concrete grants.
    assert_eq!(injector.rules().grants.len(), 4);
}

// ---------------------------------------------------------------------
// S4 — ASSIGN + GRANT in one transaction: one permissions save
// ---------------------------------------------------------------------

#[test]
fn test_s4_assign_and_grant_fold_once() {
    let mut injector = injector_with(&["projects"]);
    open_tx(&mut injector);

    let r = client(
        &mut injector,
        query("ELECTRIC ASSIGN 'admin' TO projects.owner_id"),
    );
    assert_eq!(r.to_server.len(), 1, "one introspection round-trip");
    let r = introspection_reply(&mut injector, &schema_json("projects", true));
    assert_eq!(completion_tags(&r), vec!["ELECTRIC ASSIGN"]);

    // Second command on the same table: schema cache hit, no round-trip.
    let r = client(
        &mut injector,
        query("ELECTRIC GRANT READ ON projects TO 'member'"),
    );
    assert!(r.to_server.is_empty(), "introspection must be cached");
    assert_eq!(completion_tags(&r), vec!["ELECTRIC GRANT"]);

    // Commit: version capture, exactly one permissions save with both folds.
    let commit = query("COMMIT");
    client(&mut injector, commit.clone());
    let r = server(&mut injector, rfq(TxStatus::InTransaction));
    let save = sql_of(&r.to_server[0]);
    assert!(save.contains("permission_rules"));
    assert!(save.contains("admin"));
    assert!(save.contains("member"));

    let r = server(&mut injector, rfq(TxStatus::InTransaction));
    assert_forwarded_to_server(&r, &commit);
    let r = server(&mut injector, cc("COMMIT"));
    assert_eq!(completion_tags(&r), vec!["COMMIT"]);
    server(&mut injector, rfq(TxStatus::Idle));

    assert_eq!(injector.rules().assigns.len(), 1);
    assert_eq!(injector.rules().grants.len(), 1);
}

// ---------------------------------------------------------------------
// S5 — server error during electrification (adhoc, extended)
// ---------------------------------------------------------------------

#[test]
fn test_s5_server_error_during_enable_extended() {
    let mut injector = injector_with(&[]);

    // BEGIN over the extended protocol, passed through.
    for frame in [
        parse_msg("", "BEGIN"),
        bind_msg("", ""),
        execute_msg(""),
        sync_msg(),
    ] {
        let r = client(&mut injector, frame.clone());
        assert_forwarded_to_server(&r, &frame);
    }
    for frame in [
        Frame::empty(tag::PARSE_COMPLETE),
        Frame::empty(tag::BIND_COMPLETE),
        cc("BEGIN"),
        rfq(TxStatus::InTransaction),
    ] {
        server(&mut injector, frame);
    }
    assert_eq!(injector.tx_status(), TxStatus::InTransaction);

    // The DDLX statement is answered locally, never forwarded.
    let r = client(&mut injector, parse_msg("", "ALTER TABLE something ENABLE ELECTRIC"));
    assert!(r.to_server.is_empty());
    assert_eq!(r.to_client[0].tag, tag::PARSE_COMPLETE);

    let r = client(&mut injector, bind_msg("", ""));
    assert!(r.to_server.is_empty());
    assert_eq!(r.to_client[0].tag, tag::BIND_COMPLETE);

    // Execute starts the introspection; Sync is deferred behind it.
    let r = client(&mut injector, execute_msg(""));
    assert!(sql_of(&r.to_server[0]).contains("'something'"));
    let r = client(&mut injector, sync_msg());
    assert_silent(&r);

    let r = introspection_reply(&mut injector, &schema_json("something", false));
    assert_eq!(r.to_server.len(), 1);
    assert_eq!(
        sql_of(&r.to_server[0]),
        "CALL electric.electrify('public.something')"
    );

    // The server refuses; its error reaches the client verbatim.
    let denied = error_response("permission denied for schema electric");
    let r = server(&mut injector, denied.clone());
    assert_forwarded_to_client(&r, &denied);

    // The failed ReadyForQuery releases the deferred Sync.
    let r = server(&mut injector, rfq(TxStatus::Failed));
    assert_eq!(r.to_client.len(), 1);
    assert_eq!(r.to_client[0].to_bytes(), rfq(TxStatus::Failed).to_bytes());
    assert_eq!(injector.tx_status(), TxStatus::Failed);

    // The client rolls back and the connection returns to idle.
    let rollback = query("ROLLBACK");
    let r = client(&mut injector, rollback.clone());
    assert_forwarded_to_server(&r, &rollback);
    server(&mut injector, cc("ROLLBACK"));
    let r = server(&mut injector, rfq(TxStatus::Idle));
    assert_forwarded_to_client(&r, &rfq(TxStatus::Idle));
    assert_eq!(injector.tx_status(), TxStatus::Idle);
}

// ---------------------------------------------------------------------
// S6 — malformed DDLX: no server round-trip
// ---------------------------------------------------------------------

#[test]
fn test_s6_malformed_ddlx() {
    let mut injector = injector_with(&["projects"]);
    open_tx(&mut injector);

    let r = client(&mut injector, query("ELECTRIC GRNT ALL ON projects TO 'member'"));
    assert!(r.to_server.is_empty(), "no server round-trip for a parse error");
    assert_eq!(r.to_client.len(), 2);
    assert_eq!(r.to_client[0].tag, tag::ERROR_RESPONSE);
    assert_eq!(r.to_client[1].to_bytes(), rfq(TxStatus::Failed).to_bytes());
    assert_eq!(injector.tx_status(), TxStatus::Failed);

    let rollback = query("ROLLBACK");
    let r = client(&mut injector, rollback.clone());
    assert_forwarded_to_server(&r, &rollback);
    server(&mut injector, cc("ROLLBACK"));
    server(&mut injector, rfq(TxStatus::Idle));
    assert_eq!(injector.tx_status(), TxStatus::Idle);
}

// ---------------------------------------------------------------------
// Boundary behaviors
// ---------------------------------------------------------------------

#[test]
fn test_ddlx_on_missing_table_fails_after_one_round_trip() {
    let mut injector = injector_with(&[]);
    open_tx(&mut injector);

    let r = client(&mut injector, query("ELECTRIC ENABLE ghost"));
    assert_eq!(r.to_server.len(), 1, "exactly one introspection round-trip");

    // Empty result set: the table does not exist.
    let r = server(&mut injector, cc("SELECT 0"));
    assert_silent(&r);
    let r = server(&mut injector, rfq(TxStatus::InTransaction));
    assert!(r.to_server.is_empty(), "no further round-trips");
    assert_eq!(r.to_client[0].tag, tag::ERROR_RESPONSE);
    assert_eq!(r.to_client[1].to_bytes(), rfq(TxStatus::Failed).to_bytes());
    assert_eq!(injector.tx_status(), TxStatus::Failed);
}

#[test]
fn test_mixed_batch_rejected() {
    let mut injector = injector_with(&[]);
    open_tx(&mut injector);

    let r = client(&mut injector, query("ELECTRIC ENABLE a; SELECT 1"));
    assert!(r.to_server.is_empty());
    assert_eq!(r.to_client[0].tag, tag::ERROR_RESPONSE);
    assert_eq!(injector.tx_status(), TxStatus::Failed);
}

#[test]
fn test_feature_disabled() {
    let mut flags = FeatureFlags::new();
    flags.set(electric_core::features::PROXY_DDLX_GRANT, false);
    let mut injector = Injector::new(
        flags,
        Rules::new(),
        HashSet::new(),
        Arc::new(TestGenerator(StandardQueryGenerator)),
    );
    open_tx(&mut injector);

    let r = client(&mut injector, query("ELECTRIC GRANT READ ON projects TO 'member'"));
    assert!(r.to_server.is_empty());
    assert_eq!(r.to_client[0].tag, tag::ERROR_RESPONSE);
    assert_eq!(injector.tx_status(), TxStatus::Failed);
}

#[test]
fn test_grant_on_non_electrified_table_rejected() {
    let mut injector = injector_with(&[]);
    open_tx(&mut injector);

    client(&mut injector, query("ELECTRIC GRANT ALL ON projects TO 'member'"));
    let r = introspection_reply(&mut injector, &schema_json("projects", false));
    assert_eq!(r.to_client[0].tag, tag::ERROR_RESPONSE);
    assert_eq!(injector.tx_status(), TxStatus::Failed);
}

#[test]
fn test_rollback_discards_folded_rules() {
    let mut injector = injector_with(&["projects"]);
    open_tx(&mut injector);

    client(&mut injector, query("ELECTRIC GRANT ALL ON projects TO 'member'"));
    introspection_reply(&mut injector, &schema_json("projects", true));

    let rollback = query("ROLLBACK");
    let r = client(&mut injector, rollback.clone());
    assert_forwarded_to_server(&r, &rollback);
    server(&mut injector, cc("ROLLBACK"));
    server(&mut injector, rfq(TxStatus::Idle));

    assert!(injector.rules().is_empty(), "rolled-back fold must not persist");
    assert_eq!(injector.tx_status(), TxStatus::Idle);
}

// ---------------------------------------------------------------------
// Scenario none — implicit transaction wrapping
// ---------------------------------------------------------------------

#[test]
fn test_none_scenario_implicit_enable() {
    let mut injector = injector_with(&[]);

    // A standalone ELECTRIC ENABLE gets wrapped server-side.
    let r = client(&mut injector, query("ELECTRIC ENABLE things"));
    assert_eq!(r.to_server.len(), 1);
    assert_eq!(sql_of(&r.to_server[0]), "BEGIN");
    assert!(r.to_client.is_empty());

    let r = server(&mut injector, cc("BEGIN"));
    assert_silent(&r);
    // Transaction open: introspection goes out.
    let r = server(&mut injector, rfq(TxStatus::InTransaction));
    assert_eq!(r.to_server.len(), 1);
    assert!(sql_of(&r.to_server[0]).contains("'things'"));

    let r = introspection_reply(&mut injector, &schema_json("things", false));
    assert_eq!(sql_of(&r.to_server[0]), "CALL electric.electrify('public.things')");

    let r = server(&mut injector, cc("CALL"));
    assert_silent(&r);
    // Enable finished: version capture starts; the client still waits.
    let r = server(&mut injector, rfq(TxStatus::InTransaction));
    assert!(r.to_client.is_empty());
    assert!(sql_of(&r.to_server[0]).contains("electric.migration_versions"));

    let r = server(&mut injector, cc("INSERT 0 1"));
    assert_silent(&r);
    let r = server(&mut injector, rfq(TxStatus::InTransaction));
    assert_eq!(sql_of(&r.to_server[0]), "COMMIT");

    let r = server(&mut injector, cc("COMMIT"));
    assert_silent(&r);
    // The client sees exactly its own completion and an idle prompt.
    let r = server(&mut injector, rfq(TxStatus::Idle));
    assert!(r.to_server.is_empty());
    assert_eq!(completion_tags(&r), vec!["ELECTRIC ENABLE"]);
    assert_eq!(
        r.to_client.last().unwrap().to_bytes(),
        rfq(TxStatus::Idle).to_bytes()
    );

    assert_eq!(injector.tx_status(), TxStatus::Idle);
    assert!(injector.is_electrified(&TableName::public("things")));
}

// ---------------------------------------------------------------------
// Framework markers (ecto-style version reuse)
// ---------------------------------------------------------------------

#[test]
fn test_framework_version_reused_for_capture() {
    let mut injector = injector_with(&["users"]);
    open_tx(&mut injector);

    let alter = query("ALTER TABLE users ADD COLUMN email text");
    client(&mut injector, alter.clone());
    server(&mut injector, cc("ALTER TABLE"));
    server(&mut injector, rfq(TxStatus::InTransaction));

    // The migration tool records its version; the insert passes through.
    let marker = query(
        "INSERT INTO \"schema_migrations\" (version, inserted_at) VALUES (20230904142501, now())",
    );
    let r = client(&mut injector, marker.clone());
    assert_forwarded_to_server(&r, &marker);
    server(&mut injector, cc("INSERT 0 1"));
    server(&mut injector, rfq(TxStatus::InTransaction));

    let r = client(&mut injector, query("COMMIT"));
    let capture = sql_of(&r.to_server[0]);
    assert!(
        capture.contains("20230904142501"),
        "framework version must win: {capture}"
    );
    assert!(!capture.contains(TEST_VERSION));
}

// ---------------------------------------------------------------------
// Pass-through sanity (INV-1 for simple protocol)
// ---------------------------------------------------------------------

#[test]
fn test_clean_simple_transaction_is_byte_transparent() {
    let mut injector = injector_with(&[]);

    let frames = [
        query("BEGIN"),
        query("CREATE TABLE foo(id int)"),
        query("INSERT INTO foo VALUES (1)"),
        query("COMMIT"),
    ];
    let replies = [
        (cc("BEGIN"), rfq(TxStatus::InTransaction)),
        (cc("CREATE TABLE"), rfq(TxStatus::InTransaction)),
        (cc("INSERT 0 1"), rfq(TxStatus::InTransaction)),
        (cc("COMMIT"), rfq(TxStatus::Idle)),
    ];

    for (frame, (complete, ready)) in frames.iter().zip(replies) {
        let r = client(&mut injector, frame.clone());
        assert_forwarded_to_server(&r, frame);
        let r = server(&mut injector, complete.clone());
        assert_forwarded_to_client(&r, &complete);
        let r = server(&mut injector, ready.clone());
        assert_forwarded_to_client(&r, &ready);
    }
    assert_eq!(injector.tx_status(), TxStatus::Idle);
}

// ---------------------------------------------------------------------
// Single-query batches
// ---------------------------------------------------------------------

#[test]
fn test_whole_transaction_in_one_query_batch() {
    let mut injector = injector_with(&["users"]);

    // The whole migration arrives as one query; the trailing COMMIT is
    // stripped and the rest forwarded.
    let batch = query("BEGIN; ALTER TABLE users ADD COLUMN email text; COMMIT;");
    let r = client(&mut injector, batch);
    assert!(r.to_client.is_empty());
    assert_eq!(r.to_server.len(), 1);
    assert_eq!(
        sql_of(&r.to_server[0]),
        "BEGIN; ALTER TABLE users ADD COLUMN email text"
    );

    // The partial batch's completions reach the client as usual.
    let r = server(&mut injector, cc("BEGIN"));
    assert_forwarded_to_client(&r, &cc("BEGIN"));
    let r = server(&mut injector, cc("ALTER TABLE"));
    assert_forwarded_to_client(&r, &cc("ALTER TABLE"));

    // The batch's ReadyForQuery opens the tracked transaction and kicks
    // off the bookkeeping sequence instead of reaching the client.
    let r = server(&mut injector, rfq(TxStatus::InTransaction));
    assert!(r.to_client.is_empty());
    assert_eq!(injector.tx_status(), TxStatus::InTransaction);
    assert!(sql_of(&r.to_server[0]).contains("electric.migration_versions"));

    let r = server(&mut injector, cc("INSERT 0 1"));
    assert_silent(&r);
    let r = server(&mut injector, rfq(TxStatus::InTransaction));
    assert_eq!(r.to_server.len(), 1);
    assert_eq!(sql_of(&r.to_server[0]), "COMMIT");

    let r = server(&mut injector, cc("COMMIT"));
    assert_eq!(completion_tags(&r), vec!["COMMIT"]);
    let r = server(&mut injector, rfq(TxStatus::Idle));
    assert_forwarded_to_client(&r, &rfq(TxStatus::Idle));
    assert_eq!(injector.tx_status(), TxStatus::Idle);
}

#[test]
fn test_batched_marker_version_survives_commit_interception() {
    let mut injector = injector_with(&["users"]);

    let batch = query(
        "BEGIN; ALTER TABLE users ADD COLUMN email text; \
         INSERT INTO schema_migrations (version) VALUES (20230904142501); COMMIT;",
    );
    client(&mut injector, batch);
    for completion in ["BEGIN", "ALTER TABLE", "INSERT 0 1"] {
        server(&mut injector, cc(completion));
    }

    // The version capture reuses the framework version the batch carried.
    let r = server(&mut injector, rfq(TxStatus::InTransaction));
    let capture = sql_of(&r.to_server[0]);
    assert!(
        capture.contains("20230904142501"),
        "framework version must win: {capture}"
    );
    assert!(!capture.contains(TEST_VERSION));
}

#[test]
fn test_mixed_commit_batch_in_dirty_transaction_refused() {
    let mut injector = injector_with(&["users"]);
    open_tx(&mut injector);

    // Make the transaction dirty first.
    client(&mut injector, query("ALTER TABLE users ADD COLUMN email text"));
    server(&mut injector, cc("ALTER TABLE"));
    server(&mut injector, rfq(TxStatus::InTransaction));

    // COMMIT mixed with another statement is refused outright.
    let r = client(&mut injector, query("UPDATE users SET email = 'x'; COMMIT"));
    assert!(r.to_server.is_empty(), "refused batch must not reach the server");
    assert_eq!(r.to_client[0].tag, tag::ERROR_RESPONSE);
    assert_eq!(r.to_client[1].to_bytes(), rfq(TxStatus::Failed).to_bytes());
    assert_eq!(injector.tx_status(), TxStatus::Failed);

    // The client rolls back and recovers.
    let rollback = query("ROLLBACK");
    let r = client(&mut injector, rollback.clone());
    assert_forwarded_to_server(&r, &rollback);
    server(&mut injector, cc("ROLLBACK"));
    server(&mut injector, rfq(TxStatus::Idle));
    assert_eq!(injector.tx_status(), TxStatus::Idle);
}

// ---------------------------------------------------------------------
// Failed-state recovery
// ---------------------------------------------------------------------

#[test]
fn test_commit_in_failed_transaction_becomes_rollback() {
    let mut injector = injector_with(&[]);
    open_tx(&mut injector);
    client(&mut injector, query("ELECTRIC GRNT nope"));
    assert_eq!(injector.tx_status(), TxStatus::Failed);

    let r = client(&mut injector, query("COMMIT"));
    assert_eq!(sql_of(&r.to_server[0]), "ROLLBACK");
    assert!(r.to_client.is_empty());

    server(&mut injector, cc("ROLLBACK"));
    let r = server(&mut injector, rfq(TxStatus::Idle));
    assert_eq!(completion_tags(&r), vec!["ROLLBACK"]);
    assert_eq!(
        r.to_client.last().unwrap().to_bytes(),
        rfq(TxStatus::Idle).to_bytes()
    );
    assert_eq!(injector.tx_status(), TxStatus::Idle);
}

#[test]
fn test_statement_in_failed_transaction_rolls_back_first() {
    let mut injector = injector_with(&[]);
    open_tx(&mut injector);
    client(&mut injector, query("ELECTRIC GRNT nope"));
    assert_eq!(injector.tx_status(), TxStatus::Failed);

    // A non-rollback statement triggers a synthesized rollback, then runs.
    let select = query("SELECT 1");
    let r = client(&mut injector, select.clone());
    assert_eq!(sql_of(&r.to_server[0]), "ROLLBACK");

    server(&mut injector, cc("ROLLBACK"));
    let r = server(&mut injector, rfq(TxStatus::Idle));
    // The stashed SELECT is replayed once the connection is clean.
    assert_eq!(r.to_server.len(), 1);
    assert_eq!(r.to_server[0].to_bytes(), select.to_bytes());
    assert_eq!(injector.tx_status(), TxStatus::Idle);
}

// ---------------------------------------------------------------------
// Sqlite verbatim capture
// ---------------------------------------------------------------------

#[test]
fn test_sqlite_command_writes_version_on_commit() {
    let mut injector = injector_with(&[]);
    open_tx(&mut injector);

    // No target table: no introspection, no upstream SQL, immediate tag.
    let r = client(
        &mut injector,
        query("ELECTRIC SQLITE '--pragma defer_foreign_keys; SELECT 1;'"),
    );
    assert!(r.to_server.is_empty());
    assert_eq!(completion_tags(&r), vec!["ELECTRIC SQLITE"]);

    // The transaction is dirty: commit runs the version capture.
    let r = client(&mut injector, query("COMMIT"));
    assert!(sql_of(&r.to_server[0]).contains("electric.migration_versions"));
}
