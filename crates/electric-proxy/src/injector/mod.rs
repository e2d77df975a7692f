//! The per-connection injector state machine.
//!
//! The injector is sans-io: every tick is `handle(source, frame)` over one
//! frame from one endpoint, returning the frames to emit on each side. The
//! session task owns the sockets; everything in here is synchronous.
//!
//! Transaction state follows the server's `ReadyForQuery` reports. While a
//! synthetic operation is in flight the injector queues incoming client
//! frames and replays them once the operation settles, so client statements
//! always resolve in order.

mod marker;
mod server;

use crate::generator::QueryGenerator;
use crate::loader::SchemaLoader;
use electric_core::{FeatureFlags, TableName};
use electric_ddlx::{self as ddlx, DdlxCommand, Statement, TxControl};
use electric_policy::Rules;
use electric_wire::backend::{self, TxStatus};
use electric_wire::frontend::{self, FrontendView};
use electric_wire::Frame;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

// SQLSTATE codes for the errors the injector raises itself.
const SQLSTATE_SYNTAX_ERROR: &str = "42601";
const SQLSTATE_FEATURE_NOT_SUPPORTED: &str = "0A000";
const SQLSTATE_UNDEFINED_TABLE: &str = "42P01";
const SQLSTATE_INSUFFICIENT_PRIVILEGE: &str = "42501";
const SQLSTATE_PROTOCOL_VIOLATION: &str = "08P01";

/// Which endpoint a frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// The connecting client.
    Client,
    /// The upstream server.
    Server,
}

/// The frames one tick decided to emit.
#[derive(Debug, Default)]
pub struct Reaction {
    /// Frames for the client socket, in order.
    pub to_client: Vec<Frame>,
    /// Frames for the server socket, in order.
    pub to_server: Vec<Frame>,
    /// Close both sockets once the queues are flushed.
    pub shutdown: bool,
}

/// How the statement being serviced arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Via {
    /// A simple-protocol `Query`.
    Simple,
    /// An extended-protocol Parse/Bind/Execute cycle.
    Extended,
}

/// Per-transaction bookkeeping.
#[derive(Debug, Default)]
pub(crate) struct Tx {
    /// Set when the transaction was opened by the injector itself to wrap a
    /// standalone statement; records how that statement arrived.
    pub implicit: Option<Via>,
    /// An electrified DDL statement completed inside this transaction.
    pub electrified_ddl_seen: bool,
    /// At least one DDLX command was processed.
    pub ddlx_seen: bool,
    /// The folded rules, present once a permission command was applied.
    pub permissions_dirty: Option<Rules>,
    /// Framework-supplied migration version, when a marker appeared.
    pub version: Option<String>,
    /// Captured `ELECTRIC SQLITE` bodies for downstream replay.
    pub sqlite_captured: Vec<String>,
}

impl Tx {
    /// Whether commit must run the bookkeeping sequence.
    pub fn dirty(&self) -> bool {
        self.electrified_ddl_seen || self.ddlx_seen
    }
}

/// Transaction state, driven by server `ReadyForQuery` frames.
#[derive(Debug)]
pub(crate) enum TxState {
    Idle,
    Open(Tx),
    Failed,
}

/// What to tell the client once a synthesized ROLLBACK settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RollbackRespond {
    /// Nothing; a replayed statement speaks for itself.
    Silent,
    /// A bare `ReadyForQuery(Idle)` (implicit-transaction failure).
    EmitIdle,
    /// `CommandComplete("ROLLBACK")` + `ReadyForQuery(Idle)` (a COMMIT
    /// issued inside a failed transaction).
    EmitRollbackTag,
}

/// The synthetic operation currently in flight against the server.
#[derive(Debug)]
pub(crate) enum OpState {
    /// Nothing synthetic; server frames relay to the client.
    Relay,
    /// A wrapping `BEGIN` was sent for a standalone statement.
    AwaitingImplicitBegin {
        /// The client frame to replay once the transaction is open.
        replay: Frame,
    },
    /// The introspection query for a DDLX target is running.
    AwaitingIntrospectReply {
        command: DdlxCommand,
        table: TableName,
        via: Via,
        rows: Vec<String>,
        error: Option<String>,
    },
    /// Compiled DDLX statements are running.
    AwaitingServerSqlReply {
        command: DdlxCommand,
        via: Via,
        remaining: usize,
        errored: bool,
    },
    /// The version-capture insert is running.
    AwaitingVersionCaptureReply { errored: bool },
    /// The permission-rules upsert is running.
    AwaitingPermissionsWriteReply { errored: bool },
    /// The (held) client COMMIT has been forwarded.
    AwaitingCommitReply { errored: bool },
    /// A synthesized ROLLBACK is running.
    AwaitingRollbackReply {
        replay: Option<Frame>,
        respond: RollbackRespond,
    },
}

/// The held client frames and response shape of an intercepted commit.
#[derive(Debug)]
pub(crate) struct CommitPlan {
    /// Raw client frames to forward to the server after the bookkeeping
    /// statements succeed. Empty for injector-synthesized commits.
    pub held: Vec<Frame>,
    /// Whether the server's replies to the commit are the client's to see.
    pub visible: bool,
    /// How the committing statement arrived.
    pub via: Via,
}

/// The per-connection injector.
pub struct Injector {
    flags: FeatureFlags,
    generator: Arc<dyn QueryGenerator>,
    loader: SchemaLoader,
    rules: Rules,

    tx: TxState,
    op: OpState,
    /// Client frames deferred while a synthetic operation is in flight.
    backlog: VecDeque<Frame>,

    /// Armed when a forwarded batch ends in an intercepted COMMIT; fires on
    /// the batch's `ReadyForQuery(InTx)`.
    armed_commit: Option<CommitPlan>,
    /// A framework-marker version seen before the server reported the
    /// transaction open; adopted by the transaction once it is.
    pending_version: Option<String>,
    /// The commit sequence currently running.
    commit_plan: Option<CommitPlan>,
    /// Client-bound frames to deliver when an implicit commit finishes.
    pending_completion: Vec<Frame>,
    /// A forwarded electrified DDL statement awaits its CommandComplete.
    pending_electrified: bool,

    // Extended-protocol bookkeeping.
    prepared_ddlx: HashMap<String, DdlxCommand>,
    portal_ddlx: HashMap<String, DdlxCommand>,
    prepared_stmts: HashMap<String, Statement>,
    portal_stmt: HashMap<String, String>,
    marker_stmts: HashSet<String>,
    /// Frames of a dirty-transaction COMMIT cycle being held.
    held_commit: Option<Vec<Frame>>,
    /// After an injector-raised error in an extended cycle, drop frames
    /// until the client's Sync.
    discard_until_sync: bool,
    /// Whether any frame of the current extended cycle reached the server.
    forwarded_in_cycle: bool,

    /// Protocol inferred from the first client frame after idle.
    protocol: Option<Via>,
}

impl Injector {
    /// Build an injector with the session's bootstrap state.
    pub fn new(
        flags: FeatureFlags,
        rules: Rules,
        electrified: HashSet<TableName>,
        generator: Arc<dyn QueryGenerator>,
    ) -> Self {
        Self {
            flags,
            generator,
            loader: SchemaLoader::new(electrified),
            rules,
            tx: TxState::Idle,
            op: OpState::Relay,
            backlog: VecDeque::new(),
            armed_commit: None,
            pending_version: None,
            commit_plan: None,
            pending_completion: Vec::new(),
            pending_electrified: false,
            prepared_ddlx: HashMap::new(),
            portal_ddlx: HashMap::new(),
            prepared_stmts: HashMap::new(),
            portal_stmt: HashMap::new(),
            marker_stmts: HashSet::new(),
            held_commit: None,
            discard_until_sync: false,
            forwarded_in_cycle: false,
            protocol: None,
        }
    }

    /// One tick: consume a frame from one endpoint.
    pub fn handle(&mut self, source: Source, frame: Frame) -> Reaction {
        let mut reaction = Reaction::default();
        match source {
            Source::Client => {
                if matches!(self.op, OpState::Relay) {
                    self.client_frame(frame, &mut reaction);
                } else {
                    self.backlog.push_back(frame);
                }
            }
            Source::Server => {
                self.server_frame(frame, &mut reaction);
                self.drain_backlog(&mut reaction);
            }
        }
        reaction
    }

    /// The transaction status as the injector currently sees it.
    pub fn tx_status(&self) -> TxStatus {
        match self.tx {
            TxState::Idle => TxStatus::Idle,
            TxState::Open(_) => TxStatus::InTransaction,
            TxState::Failed => TxStatus::Failed,
        }
    }

    /// The session's current (committed) rules value.
    pub fn rules(&self) -> &Rules {
        &self.rules
    }

    /// Whether a synthetic operation is waiting on the server; the session
    /// bounds that wait with the query timeout.
    pub fn awaiting_server(&self) -> bool {
        !matches!(self.op, OpState::Relay)
    }

    /// Whether the session currently treats a table as electrified.
    pub fn is_electrified(&self, table: &TableName) -> bool {
        self.loader.is_electrified(table)
    }

    fn drain_backlog(&mut self, reaction: &mut Reaction) {
        while matches!(self.op, OpState::Relay) {
            let Some(frame) = self.backlog.pop_front() else {
                break;
            };
            self.client_frame(frame, reaction);
        }
    }

    // ------------------------------------------------------------------
    // Client frames
    // ------------------------------------------------------------------

    fn client_frame(&mut self, frame: Frame, reaction: &mut Reaction) {
        let view = match FrontendView::decode(&frame) {
            Ok(view) => view,
            Err(err) => {
                self.protocol_violation(&err.to_string(), reaction);
                return;
            }
        };

        if self.protocol.is_none() {
            self.protocol = match view {
                FrontendView::Query(_) => Some(Via::Simple),
                FrontendView::Terminate | FrontendView::Other => None,
                _ => Some(Via::Extended),
            };
        }

        if self.discard_until_sync {
            match view {
                FrontendView::Sync => {
                    self.discard_until_sync = false;
                    self.forwarded_in_cycle = false;
                    reaction
                        .to_client
                        .push(backend::ready_for_query(self.tx_status()));
                }
                FrontendView::Terminate => {
                    reaction.to_server.push(frame);
                    reaction.shutdown = true;
                }
                _ => {}
            }
            return;
        }

        if matches!(self.tx, TxState::Failed) {
            self.client_frame_failed(view, frame, reaction);
            return;
        }

        match view {
            FrontendView::Query(sql) => self.simple_query(&sql, frame, reaction),
            FrontendView::Parse { statement, sql } => {
                self.extended_parse(statement, &sql, frame, reaction)
            }
            FrontendView::Bind { portal, statement } => {
                self.extended_bind(portal, statement, frame, reaction)
            }
            FrontendView::Describe { kind, name } => {
                self.extended_describe(kind, &name, frame, reaction)
            }
            FrontendView::Execute { portal } => self.extended_execute(&portal, frame, reaction),
            FrontendView::Close { kind, name } => {
                self.extended_close(kind, &name, frame, reaction)
            }
            FrontendView::Sync => self.extended_sync(frame, reaction),
            FrontendView::Flush => {
                if self.forwarded_in_cycle {
                    reaction.to_server.push(frame);
                }
            }
            FrontendView::Terminate => {
                reaction.to_server.push(frame);
                reaction.shutdown = true;
            }
            FrontendView::Other => reaction.to_server.push(frame),
        }
    }

    /// Client activity inside a failed transaction: a rollback proceeds, a
    /// COMMIT becomes a rollback (as the server itself would treat it), and
    /// anything else gets a rollback synthesized in front of it.
    fn client_frame_failed(&mut self, view: FrontendView, frame: Frame, reaction: &mut Reaction) {
        match &view {
            FrontendView::Query(sql) => match ddlx::classify_batch(sql) {
                Ok(statements) => match statements.as_slice() {
                    [Statement::TxControl(TxControl::Rollback)] => {
                        reaction.to_server.push(frame);
                    }
                    [Statement::TxControl(TxControl::Commit)] => {
                        reaction.to_server.push(frontend::query("ROLLBACK"));
                        self.op = OpState::AwaitingRollbackReply {
                            replay: None,
                            respond: RollbackRespond::EmitRollbackTag,
                        };
                    }
                    _ => self.synthesize_rollback(Some(frame), reaction),
                },
                Err(_) => self.synthesize_rollback(Some(frame), reaction),
            },
            FrontendView::Sync => {
                reaction
                    .to_client
                    .push(backend::ready_for_query(TxStatus::Failed));
            }
            FrontendView::Terminate => {
                reaction.to_server.push(frame);
                reaction.shutdown = true;
            }
            _ => self.synthesize_rollback(Some(frame), reaction),
        }
    }

    fn synthesize_rollback(&mut self, replay: Option<Frame>, reaction: &mut Reaction) {
        reaction.to_server.push(frontend::query("ROLLBACK"));
        self.op = OpState::AwaitingRollbackReply {
            replay,
            respond: RollbackRespond::Silent,
        };
    }

    // ------------------------------------------------------------------
    // Simple protocol
    // ------------------------------------------------------------------

    fn simple_query(&mut self, sql: &str, frame: Frame, reaction: &mut Reaction) {
        let statements = match ddlx::classify_batch(sql) {
            Ok(statements) => statements,
            Err(err) => {
                self.ddlx_failure(&err, Via::Simple, reaction);
                return;
            }
        };

        // Framework bookkeeping inserts supply the version stamp; scanned
        // per statement so a marker buried in a batch still counts. One
        // seen before the server has reported the transaction open (a whole
        // BEGIN … COMMIT batch in one query) is stashed until it does.
        for part in ddlx::split_batch(sql) {
            if let marker::Marker::Version(version) = marker::scan(part) {
                match &mut self.tx {
                    TxState::Open(tx) => tx.version = Some(version),
                    _ => self.pending_version = Some(version),
                }
            }
        }

        if let [Statement::Ddlx(command)] = statements.as_slice() {
            let command = command.clone();
            if let Err(err) = command.check_features(&self.flags) {
                self.ddlx_failure(&err, Via::Simple, reaction);
                return;
            }
            match self.tx {
                TxState::Idle => self.wrap_implicit(frame, reaction),
                TxState::Open(_) => self.start_ddlx(command, Via::Simple, reaction),
                TxState::Failed => unreachable!("failed state handled by caller"),
            }
            return;
        }

        let contains_commit = statements
            .iter()
            .any(|s| matches!(s, Statement::TxControl(TxControl::Commit)));
        let ends_with_commit = matches!(
            statements.last(),
            Some(Statement::TxControl(TxControl::Commit))
        );
        let contains_electrified = statements.iter().any(|s| {
            matches!(s, Statement::Ddl { table, .. } if self.loader.is_electrified(table))
        });

        let open_dirty = match &self.tx {
            TxState::Idle => None,
            TxState::Open(tx) => Some(tx.dirty()),
            TxState::Failed => unreachable!("failed state handled by caller"),
        };

        match open_dirty {
            None => {
                if contains_electrified {
                    if contains_commit {
                        self.intercept_batch_commit(sql, ends_with_commit, reaction);
                    } else {
                        // A standalone electrified statement (or batch) gets
                        // wrapped so the version capture joins its
                        // transaction. A batch opening its own BEGIN keeps
                        // the transaction open and commits later.
                        let opens_tx = matches!(
                            statements.first(),
                            Some(Statement::TxControl(TxControl::Begin))
                        );
                        if opens_tx {
                            self.pending_electrified = true;
                            reaction.to_server.push(frame);
                        } else {
                            self.wrap_implicit(frame, reaction);
                        }
                    }
                } else {
                    reaction.to_server.push(frame);
                }
            }
            Some(base_dirty) => {
                let dirty = base_dirty || contains_electrified;
                if contains_commit && dirty {
                    if statements.len() == 1 {
                        self.begin_commit_sequence(
                            CommitPlan {
                                held: vec![frame],
                                visible: true,
                                via: Via::Simple,
                            },
                            reaction,
                        );
                    } else {
                        // Inside an open transaction that is (or would
                        // become) dirty, the COMMIT must be the only
                        // statement of its query.
                        self.client_error(
                            SQLSTATE_FEATURE_NOT_SUPPORTED,
                            "COMMIT must be the only statement in its query \
                             inside a transaction that changes electrified state",
                            Via::Simple,
                            reaction,
                        );
                    }
                } else {
                    if contains_electrified {
                        self.pending_electrified = true;
                    }
                    reaction.to_server.push(frame);
                }
            }
        }
    }

    /// A whole transaction delivered from idle in one query (`BEGIN; …;
    /// COMMIT`): forward the batch minus its trailing COMMIT, then run the
    /// bookkeeping sequence when the partial batch's ReadyForQuery arrives.
    fn intercept_batch_commit(
        &mut self,
        sql: &str,
        ends_with_commit: bool,
        reaction: &mut Reaction,
    ) {
        if !ends_with_commit {
            self.client_error(
                SQLSTATE_FEATURE_NOT_SUPPORTED,
                "COMMIT must be the final statement of a batch that changes electrified tables",
                Via::Simple,
                reaction,
            );
            return;
        }
        let parts = ddlx::split_batch(sql);
        let partial = parts[..parts.len() - 1].join("; ");
        self.pending_electrified = true;
        self.armed_commit = Some(CommitPlan {
            held: vec![frontend::query("COMMIT")],
            visible: true,
            via: Via::Simple,
        });
        reaction.to_server.push(frontend::query(&partial));
    }

    /// Wrap a standalone statement in a server-side transaction: send BEGIN
    /// and replay the original frame once the transaction is open.
    fn wrap_implicit(&mut self, frame: Frame, reaction: &mut Reaction) {
        reaction.to_server.push(frontend::query("BEGIN"));
        self.op = OpState::AwaitingImplicitBegin { replay: frame };
    }

    // ------------------------------------------------------------------
    // Extended protocol
    // ------------------------------------------------------------------

    fn extended_parse(
        &mut self,
        statement: String,
        sql: &str,
        frame: Frame,
        reaction: &mut Reaction,
    ) {
        if self.hold_if_committing(&frame) {
            return;
        }

        let classified = match ddlx::classify(sql) {
            Ok(classified) => classified,
            Err(err) => {
                self.ddlx_failure(&err, Via::Extended, reaction);
                return;
            }
        };

        match classified {
            Statement::Ddlx(command) => {
                if let Err(err) = command.check_features(&self.flags) {
                    self.ddlx_failure(&err, Via::Extended, reaction);
                    return;
                }
                self.prepared_stmts.remove(&statement);
                self.prepared_ddlx.insert(statement, command);
                reaction.to_client.push(backend::parse_complete());
            }
            Statement::TxControl(TxControl::Commit) if self.open_tx_dirty() => {
                self.held_commit = Some(vec![frame]);
            }
            other => {
                if matches!(marker::scan(sql), marker::Marker::Parameterized) {
                    self.marker_stmts.insert(statement.clone());
                } else if let TxState::Open(tx) = &mut self.tx {
                    if let marker::Marker::Version(version) = marker::scan(sql) {
                        tx.version = Some(version);
                    }
                }
                self.prepared_ddlx.remove(&statement);
                self.prepared_stmts.insert(statement, other);
                self.forwarded_in_cycle = true;
                reaction.to_server.push(frame);
            }
        }
    }

    fn extended_bind(
        &mut self,
        portal: String,
        statement: String,
        frame: Frame,
        reaction: &mut Reaction,
    ) {
        if self.hold_if_committing(&frame) {
            return;
        }

        if let Some(command) = self.prepared_ddlx.get(&statement) {
            self.portal_ddlx.insert(portal, command.clone());
            reaction.to_client.push(backend::bind_complete());
            return;
        }

        if self.marker_stmts.contains(&statement) {
            if let Some((format, Some(value))) = frontend::bind_first_param(&frame) {
                if let Some(version) = marker::decode_bound_version(format, &value) {
                    if let TxState::Open(tx) = &mut self.tx {
                        tx.version = Some(version);
                    }
                }
            }
        }

        self.portal_ddlx.remove(&portal);
        self.portal_stmt.insert(portal, statement);
        self.forwarded_in_cycle = true;
        reaction.to_server.push(frame);
    }

    fn extended_describe(&mut self, kind: u8, name: &str, frame: Frame, reaction: &mut Reaction) {
        if self.hold_if_committing(&frame) {
            return;
        }

        let is_ddlx = match kind {
            b'S' => self.prepared_ddlx.contains_key(name),
            _ => self.portal_ddlx.contains_key(name),
        };
        if is_ddlx {
            if kind == b'S' {
                reaction
                    .to_client
                    .push(backend::parameter_description_empty());
            }
            reaction.to_client.push(backend::no_data());
        } else {
            self.forwarded_in_cycle = true;
            reaction.to_server.push(frame);
        }
    }

    fn extended_execute(&mut self, portal: &str, frame: Frame, reaction: &mut Reaction) {
        if self.hold_if_committing(&frame) {
            return;
        }

        if let Some(command) = self.portal_ddlx.get(portal).cloned() {
            match self.tx {
                TxState::Idle => self.wrap_implicit(frame, reaction),
                TxState::Open(_) => self.start_ddlx(command, Via::Extended, reaction),
                TxState::Failed => unreachable!("failed state handled by caller"),
            }
            return;
        }

        let classified = self
            .portal_stmt
            .get(portal)
            .and_then(|statement| self.prepared_stmts.get(statement));
        match classified {
            Some(Statement::TxControl(TxControl::Commit)) if self.open_tx_dirty() => {
                // The COMMIT was prepared before the transaction went dirty;
                // hold its execution instead.
                self.held_commit = Some(vec![frame]);
            }
            Some(Statement::Ddl { table, .. }) if self.loader.is_electrified(table) => {
                self.pending_electrified = true;
                self.forwarded_in_cycle = true;
                reaction.to_server.push(frame);
            }
            _ => {
                self.forwarded_in_cycle = true;
                reaction.to_server.push(frame);
            }
        }
    }

    fn extended_close(&mut self, kind: u8, name: &str, frame: Frame, reaction: &mut Reaction) {
        if self.hold_if_committing(&frame) {
            return;
        }

        let was_ddlx = match kind {
            b'S' => {
                self.prepared_stmts.remove(name);
                self.marker_stmts.remove(name);
                self.prepared_ddlx.remove(name).is_some()
            }
            _ => {
                self.portal_stmt.remove(name);
                self.portal_ddlx.remove(name).is_some()
            }
        };
        if was_ddlx {
            reaction.to_client.push(backend::close_complete());
        } else {
            self.forwarded_in_cycle = true;
            reaction.to_server.push(frame);
        }
    }

    fn extended_sync(&mut self, frame: Frame, reaction: &mut Reaction) {
        if let Some(mut held) = self.held_commit.take() {
            held.push(frame);
            self.begin_commit_sequence(
                CommitPlan {
                    held,
                    visible: true,
                    via: Via::Extended,
                },
                reaction,
            );
            self.forwarded_in_cycle = false;
            return;
        }

        if self.forwarded_in_cycle {
            self.forwarded_in_cycle = false;
            reaction.to_server.push(frame);
        } else {
            // Every frame of the cycle was answered locally; the server saw
            // nothing, so the ReadyForQuery is ours to synthesize.
            reaction
                .to_client
                .push(backend::ready_for_query(self.tx_status()));
        }
    }

    /// While a dirty COMMIT cycle is being held, append every client frame
    /// to the hold instead of processing it.
    fn hold_if_committing(&mut self, frame: &Frame) -> bool {
        if let Some(held) = &mut self.held_commit {
            held.push(frame.clone());
            return true;
        }
        false
    }

    fn open_tx_dirty(&self) -> bool {
        matches!(&self.tx, TxState::Open(tx) if tx.dirty())
    }

    // ------------------------------------------------------------------
    // Shared failure paths
    // ------------------------------------------------------------------

    fn ddlx_failure(&mut self, err: &ddlx::DdlxError, via: Via, reaction: &mut Reaction) {
        let code = match err {
            ddlx::DdlxError::Parse { .. } => SQLSTATE_SYNTAX_ERROR,
            ddlx::DdlxError::FeatureDisabled { .. } | ddlx::DdlxError::MixedBatch => {
                SQLSTATE_FEATURE_NOT_SUPPORTED
            }
        };
        self.client_error(code, &err.to_string(), via, reaction);
    }

    /// Surface an injector-raised error to the client and fail the open
    /// transaction. The server is left alone; a rollback is synthesized
    /// later if needed.
    pub(crate) fn client_error(
        &mut self,
        code: &str,
        message: &str,
        via: Via,
        reaction: &mut Reaction,
    ) {
        reaction.to_client.push(backend::error_response(code, message));

        if matches!(&self.tx, TxState::Open(tx) if tx.implicit.is_some()) {
            // The wrapping transaction is ours; roll it back and give the
            // client its terminal ReadyForQuery once the server is idle.
            let respond = match via {
                Via::Simple => RollbackRespond::EmitIdle,
                Via::Extended => RollbackRespond::Silent,
            };
            reaction.to_server.push(frontend::query("ROLLBACK"));
            self.abort_tx_state();
            self.op = OpState::AwaitingRollbackReply {
                replay: None,
                respond,
            };
            if via == Via::Extended {
                self.discard_until_sync = true;
            }
            return;
        }

        match via {
            Via::Simple => {
                let status = match self.tx {
                    TxState::Idle => TxStatus::Idle,
                    _ => TxStatus::Failed,
                };
                reaction.to_client.push(backend::ready_for_query(status));
            }
            Via::Extended => self.discard_until_sync = true,
        }
        if !matches!(self.tx, TxState::Idle) {
            self.tx = TxState::Failed;
            self.abort_tx_state();
        }
    }

    /// A fatal protocol error: tell the client, roll the server back, and
    /// recover through the synthesized rollback.
    pub(crate) fn protocol_violation(&mut self, detail: &str, reaction: &mut Reaction) {
        tracing::error!(detail, "wire protocol violation");
        reaction.to_client.push(backend::error_response(
            SQLSTATE_PROTOCOL_VIOLATION,
            &format!("protocol violation: {detail}"),
        ));
        reaction.to_server.push(frontend::query("ROLLBACK"));
        self.abort_tx_state();
        self.tx = TxState::Failed;
        self.op = OpState::AwaitingRollbackReply {
            replay: None,
            respond: RollbackRespond::EmitIdle,
        };
    }

    /// Drop every piece of uncommitted transaction state.
    pub(crate) fn abort_tx_state(&mut self) {
        self.loader.abort_tx();
        self.armed_commit = None;
        self.commit_plan = None;
        self.held_commit = None;
        self.pending_completion.clear();
        self.pending_electrified = false;
        self.pending_version = None;
        if matches!(self.tx, TxState::Open(_)) {
            self.tx = TxState::Failed;
        }
    }

    /// Reset to idle after a terminal ReadyForQuery.
    pub(crate) fn reset_to_idle(&mut self) {
        self.tx = TxState::Idle;
        self.loader.abort_tx();
        self.armed_commit = None;
        self.commit_plan = None;
        self.held_commit = None;
        self.pending_completion.clear();
        self.pending_electrified = false;
        self.pending_version = None;
        self.protocol = None;
    }
}
