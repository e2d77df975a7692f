//! Server-frame handling: the synthetic-operation substates and the
//! commit-time bookkeeping sequence.

use super::{CommitPlan, Injector, OpState, Reaction, RollbackRespond, Tx, TxState, Via};
use electric_core::TableName;
use electric_ddlx::{self as ddlx, DdlxCommand};
use electric_policy as policy;
use electric_schema::Schema;
use electric_wire::backend::{self, BackendView, TxStatus};
use electric_wire::frame::tag;
use electric_wire::frontend;
use electric_wire::Frame;

impl Injector {
    pub(super) fn server_frame(&mut self, frame: Frame, reaction: &mut Reaction) {
        let view = match BackendView::decode(&frame) {
            Ok(view) => view,
            Err(err) => {
                self.protocol_violation(&err.to_string(), reaction);
                return;
            }
        };

        // Notices pass through in every state.
        if matches!(view, BackendView::NoticeResponse) {
            reaction.to_client.push(frame);
            return;
        }

        let op = std::mem::replace(&mut self.op, OpState::Relay);
        match op {
            OpState::Relay => self.relay(view, frame, reaction),
            OpState::AwaitingImplicitBegin { replay } => {
                self.implicit_begin(view, frame, replay, reaction)
            }
            OpState::AwaitingIntrospectReply {
                command,
                table,
                via,
                rows,
                error,
            } => self.introspect_reply(command, table, via, rows, error, view, frame, reaction),
            OpState::AwaitingServerSqlReply {
                command,
                via,
                remaining,
                errored,
            } => self.server_sql_reply(command, via, remaining, errored, view, frame, reaction),
            OpState::AwaitingVersionCaptureReply { errored } => {
                self.bookkeeping_reply(BookkeepingStep::VersionCapture, errored, view, frame, reaction)
            }
            OpState::AwaitingPermissionsWriteReply { errored } => {
                self.bookkeeping_reply(BookkeepingStep::PermissionsWrite, errored, view, frame, reaction)
            }
            OpState::AwaitingCommitReply { errored } => {
                self.commit_reply(errored, view, frame, reaction)
            }
            OpState::AwaitingRollbackReply { replay, respond } => {
                self.rollback_reply(replay, respond, view, frame, reaction)
            }
        }
    }

    // ------------------------------------------------------------------
    // Relay
    // ------------------------------------------------------------------

    fn relay(&mut self, view: BackendView, frame: Frame, reaction: &mut Reaction) {
        match view {
            BackendView::ReadyForQuery(TxStatus::Idle) => {
                self.reset_to_idle();
                reaction.to_client.push(frame);
            }
            BackendView::ReadyForQuery(TxStatus::InTransaction) => {
                // The server has a transaction open now, however it was
                // opened; track it before deciding what to do with the
                // frame, so the bookkeeping sequence runs inside it.
                if matches!(self.tx, TxState::Idle) {
                    self.tx = TxState::Open(Tx {
                        version: self.pending_version.take(),
                        ..Tx::default()
                    });
                }
                if let Some(plan) = self.armed_commit.take() {
                    // The forwarded part of the batch is done; run the
                    // bookkeeping sequence before the held COMMIT.
                    self.begin_commit_sequence(plan, reaction);
                    return;
                }
                let implicit_via = match &self.tx {
                    TxState::Open(tx) => tx.implicit,
                    _ => None,
                };
                if let Some(via) = implicit_via {
                    // The wrapped statement finished; commit on the
                    // client's behalf.
                    self.begin_commit_sequence(
                        CommitPlan {
                            held: vec![frontend::query("COMMIT")],
                            visible: false,
                            via,
                        },
                        reaction,
                    );
                } else {
                    reaction.to_client.push(frame);
                }
            }
            BackendView::ReadyForQuery(TxStatus::Failed) => {
                self.abort_tx_state();
                self.tx = TxState::Failed;
                reaction.to_client.push(frame);
            }
            BackendView::CommandComplete(_) => {
                if self.pending_electrified {
                    self.pending_electrified = false;
                    if let TxState::Open(tx) = &mut self.tx {
                        tx.electrified_ddl_seen = true;
                    }
                }
                reaction.to_client.push(frame);
            }
            _ => reaction.to_client.push(frame),
        }
    }

    // ------------------------------------------------------------------
    // Implicit BEGIN
    // ------------------------------------------------------------------

    fn implicit_begin(
        &mut self,
        view: BackendView,
        frame: Frame,
        replay: Frame,
        reaction: &mut Reaction,
    ) {
        match view {
            BackendView::CommandComplete(completion) if completion == "BEGIN" => {
                self.op = OpState::AwaitingImplicitBegin { replay };
            }
            BackendView::ReadyForQuery(TxStatus::InTransaction) => {
                let via = if replay.tag == tag::QUERY {
                    Via::Simple
                } else {
                    Via::Extended
                };
                self.tx = TxState::Open(Tx {
                    implicit: Some(via),
                    ..Tx::default()
                });
                self.client_frame(replay, reaction);
            }
            BackendView::ReadyForQuery(status) => {
                // BEGIN failed outright; surface whatever the server said.
                if status == TxStatus::Failed {
                    self.abort_tx_state();
                    self.tx = TxState::Failed;
                } else {
                    self.reset_to_idle();
                }
                reaction.to_client.push(frame);
            }
            BackendView::ErrorResponse(_) => {
                reaction.to_client.push(frame);
                self.op = OpState::AwaitingImplicitBegin { replay };
            }
            _ => {
                // Replies to extended frames the client sent before the
                // wrap; they are the client's.
                reaction.to_client.push(frame);
                self.op = OpState::AwaitingImplicitBegin { replay };
            }
        }
    }

    // ------------------------------------------------------------------
    // DDLX: introspection and compiled SQL
    // ------------------------------------------------------------------

    pub(super) fn start_ddlx(&mut self, command: DdlxCommand, via: Via, reaction: &mut Reaction) {
        match command.target_table() {
            None => self.finish_ddlx(command, via, None, reaction),
            Some(table) => {
                let table = table.clone();
                if let Some(schema) = self.loader.cached(&table) {
                    self.continue_with_schema(command, via, schema, reaction);
                } else {
                    let query = self.generator.introspection_query(&table);
                    reaction.to_server.push(frontend::query(&query));
                    self.op = OpState::AwaitingIntrospectReply {
                        command,
                        table,
                        via,
                        rows: Vec::new(),
                        error: None,
                    };
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn introspect_reply(
        &mut self,
        command: DdlxCommand,
        table: TableName,
        via: Via,
        mut rows: Vec<String>,
        mut error: Option<String>,
        view: BackendView,
        _frame: Frame,
        reaction: &mut Reaction,
    ) {
        match view {
            BackendView::DataRow(values) => {
                if let Some(Some(value)) = values.first() {
                    rows.push(String::from_utf8_lossy(value).into_owned());
                }
            }
            BackendView::ErrorResponse(fields) => {
                error = Some(fields.message);
            }
            BackendView::ReadyForQuery(_) => {
                match error {
                    Some(detail) => {
                        self.introspect_failed(
                            &table,
                            &format!("schema introspection failed for {table}: {detail}"),
                            via,
                            reaction,
                        );
                    }
                    None if rows.is_empty() => {
                        self.introspect_failed(
                            &table,
                            &format!(
                                "schema introspection failed for {table}: table does not exist"
                            ),
                            via,
                            reaction,
                        );
                    }
                    None => match Schema::from_json(&rows[0]) {
                        Ok(schema) => {
                            self.loader.insert(schema);
                            // Read back through the overlay so an ENABLE
                            // earlier in the transaction is visible.
                            match self.loader.cached(&table) {
                                Some(schema) => {
                                    self.continue_with_schema(command, via, schema, reaction)
                                }
                                None => self.introspect_failed(
                                    &table,
                                    "schema cache lost its entry",
                                    via,
                                    reaction,
                                ),
                            }
                        }
                        Err(err) => {
                            self.introspect_failed(
                                &table,
                                &format!("schema introspection failed for {table}: {err}"),
                                via,
                                reaction,
                            );
                        }
                    },
                }
                return;
            }
            BackendView::RowDescription(_)
            | BackendView::CommandComplete(_)
            | BackendView::EmptyQueryResponse => {}
            _ => {
                self.protocol_violation("unexpected frame during schema introspection", reaction);
                return;
            }
        }
        self.op = OpState::AwaitingIntrospectReply {
            command,
            table,
            via,
            rows,
            error,
        };
    }

    fn introspect_failed(
        &mut self,
        _table: &TableName,
        message: &str,
        via: Via,
        reaction: &mut Reaction,
    ) {
        self.client_error(super::SQLSTATE_UNDEFINED_TABLE, message, via, reaction);
    }

    fn continue_with_schema(
        &mut self,
        command: DdlxCommand,
        via: Via,
        schema: Schema,
        reaction: &mut Reaction,
    ) {
        match &command {
            DdlxCommand::Enable { .. } | DdlxCommand::Disable { .. } => {
                let statements = ddlx::compile(&command, &schema);
                let remaining = statements.len();
                for statement in &statements {
                    reaction.to_server.push(frontend::query(statement));
                }
                self.op = OpState::AwaitingServerSqlReply {
                    command,
                    via,
                    remaining,
                    errored: false,
                };
            }
            _ => self.finish_ddlx(command, via, Some(schema), reaction),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn server_sql_reply(
        &mut self,
        command: DdlxCommand,
        via: Via,
        mut remaining: usize,
        mut errored: bool,
        view: BackendView,
        frame: Frame,
        reaction: &mut Reaction,
    ) {
        match view {
            BackendView::ErrorResponse(_) => {
                // The client sees the server's complaint verbatim.
                reaction.to_client.push(frame);
                errored = true;
            }
            BackendView::ReadyForQuery(status) => {
                if errored || status != TxStatus::InTransaction {
                    self.synthetic_op_failed(Some(frame), via, reaction);
                    return;
                }
                remaining -= 1;
                if remaining == 0 {
                    self.finish_ddlx(command, via, None, reaction);
                    return;
                }
            }
            BackendView::CommandComplete(_)
            | BackendView::RowDescription(_)
            | BackendView::DataRow(_)
            | BackendView::EmptyQueryResponse => {}
            _ => {
                self.protocol_violation("unexpected frame while applying ELECTRIC DDL", reaction);
                return;
            }
        }
        self.op = OpState::AwaitingServerSqlReply {
            command,
            via,
            remaining,
            errored,
        };
    }

    /// All server-side work for the command is done; apply its effects and
    /// give the client its single completion.
    fn finish_ddlx(
        &mut self,
        command: DdlxCommand,
        via: Via,
        schema: Option<Schema>,
        reaction: &mut Reaction,
    ) {
        match &command {
            DdlxCommand::Enable { table } => {
                self.loader.set_electrified(table.clone(), true);
            }
            DdlxCommand::Disable { table } => {
                self.loader.set_electrified(table.clone(), false);
            }
            DdlxCommand::Sqlite { body } => {
                if let TxState::Open(tx) = &mut self.tx {
                    tx.sqlite_captured.push(body.clone());
                }
            }
            _ => {
                // Permission commands fold into the dirty rules value.
                let Some(schema) = schema.as_ref() else {
                    self.protocol_violation("permission command without schema", reaction);
                    return;
                };
                let base = match &mut self.tx {
                    TxState::Open(tx) => {
                        tx.permissions_dirty.take().unwrap_or_else(|| self.rules.clone())
                    }
                    _ => self.rules.clone(),
                };
                match policy::apply(&base, &command, schema) {
                    Ok(folded) => {
                        if let TxState::Open(tx) = &mut self.tx {
                            tx.permissions_dirty = Some(folded);
                        }
                    }
                    Err(err) => {
                        self.client_error(
                            super::SQLSTATE_INSUFFICIENT_PRIVILEGE,
                            &err.to_string(),
                            via,
                            reaction,
                        );
                        return;
                    }
                }
            }
        }

        let implicit = match &mut self.tx {
            TxState::Open(tx) => {
                tx.ddlx_seen = true;
                tx.implicit
            }
            _ => None,
        };

        let completion = backend::command_complete(command.tag());
        match implicit {
            None => {
                reaction.to_client.push(completion);
                if via == Via::Simple {
                    reaction
                        .to_client
                        .push(backend::ready_for_query(TxStatus::InTransaction));
                }
                // Extended: the ReadyForQuery is synthesized when the
                // client's Sync replays.
                self.op = OpState::Relay;
            }
            Some(implicit_via) => {
                self.pending_completion.push(completion);
                self.begin_commit_sequence(
                    CommitPlan {
                        held: vec![frontend::query("COMMIT")],
                        visible: false,
                        via: implicit_via,
                    },
                    reaction,
                );
            }
        }
    }

    /// A synthetic server request failed: the transaction is failed, the
    /// client has already seen the error, and an implicit wrapper is rolled
    /// back on the client's behalf.
    fn synthetic_op_failed(
        &mut self,
        server_rfq: Option<Frame>,
        via: Via,
        reaction: &mut Reaction,
    ) {
        let implicit = matches!(&self.tx, TxState::Open(tx) if tx.implicit.is_some());
        self.abort_tx_state();
        self.tx = TxState::Failed;
        if implicit {
            reaction.to_server.push(frontend::query("ROLLBACK"));
            self.op = OpState::AwaitingRollbackReply {
                replay: None,
                respond: match via {
                    Via::Simple => RollbackRespond::EmitIdle,
                    Via::Extended => RollbackRespond::Silent,
                },
            };
        } else {
            self.op = OpState::Relay;
            if via == Via::Simple {
                if let Some(frame) = server_rfq {
                    reaction.to_client.push(frame);
                }
            }
            // Extended: the backlogged Sync finds the failed transaction
            // and reports ReadyForQuery(Failed).
        }
    }

    // ------------------------------------------------------------------
    // Commit sequence
    // ------------------------------------------------------------------

    /// Kick off version capture → permissions save → COMMIT.
    pub(super) fn begin_commit_sequence(&mut self, plan: CommitPlan, reaction: &mut Reaction) {
        let version = match &self.tx {
            TxState::Open(tx) => tx.version.clone(),
            _ => None,
        }
        .unwrap_or_else(|| self.generator.generate_version());

        let query = self.generator.capture_version_query(&version);
        reaction.to_server.push(frontend::query(&query));
        self.commit_plan = Some(plan);
        self.op = OpState::AwaitingVersionCaptureReply { errored: false };
    }

    fn bookkeeping_reply(
        &mut self,
        step: BookkeepingStep,
        mut errored: bool,
        view: BackendView,
        frame: Frame,
        reaction: &mut Reaction,
    ) {
        match view {
            BackendView::ErrorResponse(_) => {
                reaction.to_client.push(frame);
                errored = true;
            }
            BackendView::ReadyForQuery(status) => {
                if errored || status != TxStatus::InTransaction {
                    self.commit_sequence_failed(frame, reaction);
                    return;
                }
                match step {
                    BookkeepingStep::VersionCapture => {
                        let dirty_rules = match &self.tx {
                            TxState::Open(tx) => tx.permissions_dirty.clone(),
                            _ => None,
                        };
                        if let Some(rules) = dirty_rules {
                            let query = self.generator.save_rules_query(&rules);
                            reaction.to_server.push(frontend::query(&query));
                            self.op = OpState::AwaitingPermissionsWriteReply { errored: false };
                        } else {
                            self.flush_held_commit(reaction);
                        }
                    }
                    BookkeepingStep::PermissionsWrite => self.flush_held_commit(reaction),
                }
                return;
            }
            BackendView::CommandComplete(_)
            | BackendView::RowDescription(_)
            | BackendView::DataRow(_)
            | BackendView::EmptyQueryResponse => {}
            _ => {
                self.protocol_violation("unexpected frame during commit bookkeeping", reaction);
                return;
            }
        }
        self.op = match step {
            BookkeepingStep::VersionCapture => OpState::AwaitingVersionCaptureReply { errored },
            BookkeepingStep::PermissionsWrite => OpState::AwaitingPermissionsWriteReply { errored },
        };
    }

    fn flush_held_commit(&mut self, reaction: &mut Reaction) {
        if let Some(plan) = &mut self.commit_plan {
            for frame in plan.held.drain(..) {
                reaction.to_server.push(frame);
            }
        }
        self.op = OpState::AwaitingCommitReply { errored: false };
    }

    fn commit_reply(
        &mut self,
        mut errored: bool,
        view: BackendView,
        frame: Frame,
        reaction: &mut Reaction,
    ) {
        let visible = self.commit_plan.as_ref().map(|p| p.visible).unwrap_or(true);
        match view {
            BackendView::ErrorResponse(_) => {
                reaction.to_client.push(frame);
                errored = true;
            }
            BackendView::ReadyForQuery(TxStatus::Idle) if !errored => {
                self.finalize_commit(frame, reaction);
                return;
            }
            BackendView::ReadyForQuery(_) => {
                self.commit_sequence_failed(frame, reaction);
                return;
            }
            _ => {
                if visible {
                    reaction.to_client.push(frame);
                }
            }
        }
        self.op = OpState::AwaitingCommitReply { errored };
    }

    /// The whole dirty transaction is on disk; merge its effects into the
    /// session and close the loop with the client.
    fn finalize_commit(&mut self, server_rfq: Frame, reaction: &mut Reaction) {
        let plan = self.commit_plan.take();
        let (visible, via) = plan
            .map(|p| (p.visible, p.via))
            .unwrap_or((true, Via::Simple));

        if let TxState::Open(tx) = std::mem::replace(&mut self.tx, TxState::Idle) {
            if let Some(rules) = tx.permissions_dirty {
                self.rules = rules;
            }
            if !tx.sqlite_captured.is_empty() {
                tracing::debug!(
                    statements = tx.sqlite_captured.len(),
                    "captured SQLITE statements for downstream replay"
                );
            }
        }
        self.loader.commit_tx();

        let completion: Vec<Frame> = self.pending_completion.drain(..).collect();
        reaction.to_client.extend(completion);
        if visible {
            reaction.to_client.push(server_rfq);
        } else if via == Via::Simple {
            reaction
                .to_client
                .push(backend::ready_for_query(TxStatus::Idle));
        }
        // Extended implicit: the backlogged Sync synthesizes the idle
        // ReadyForQuery.

        self.protocol = None;
        self.pending_electrified = false;
        self.op = OpState::Relay;
    }

    /// A bookkeeping statement or the COMMIT itself failed; nothing was
    /// persisted (the server transaction is aborted as one unit).
    fn commit_sequence_failed(&mut self, server_rfq: Frame, reaction: &mut Reaction) {
        let (visible, via) = self
            .commit_plan
            .take()
            .map(|p| (p.visible, p.via))
            .unwrap_or((true, Via::Simple));
        let implicit = !visible;
        self.abort_tx_state();
        self.tx = TxState::Failed;

        if implicit {
            reaction.to_server.push(frontend::query("ROLLBACK"));
            self.op = OpState::AwaitingRollbackReply {
                replay: None,
                respond: match via {
                    Via::Simple => RollbackRespond::EmitIdle,
                    Via::Extended => RollbackRespond::Silent,
                },
            };
        } else {
            match via {
                Via::Simple => reaction.to_client.push(server_rfq),
                Via::Extended => {
                    // The client's Sync was consumed into the held commit;
                    // give it its terminal ReadyForQuery directly.
                    reaction
                        .to_client
                        .push(backend::ready_for_query(TxStatus::Failed));
                }
            }
            self.op = OpState::Relay;
        }
    }

    // ------------------------------------------------------------------
    // Synthesized ROLLBACK
    // ------------------------------------------------------------------

    fn rollback_reply(
        &mut self,
        replay: Option<Frame>,
        respond: RollbackRespond,
        view: BackendView,
        _frame: Frame,
        reaction: &mut Reaction,
    ) {
        match view {
            BackendView::ReadyForQuery(_) => {
                self.reset_to_idle();
                match respond {
                    RollbackRespond::Silent => {}
                    RollbackRespond::EmitIdle => {
                        reaction
                            .to_client
                            .push(backend::ready_for_query(TxStatus::Idle));
                    }
                    RollbackRespond::EmitRollbackTag => {
                        reaction
                            .to_client
                            .push(backend::command_complete("ROLLBACK"));
                        reaction
                            .to_client
                            .push(backend::ready_for_query(TxStatus::Idle));
                    }
                }
                if let Some(frame) = replay {
                    self.client_frame(frame, reaction);
                }
            }
            BackendView::ErrorResponse(fields) => {
                tracing::warn!(message = %fields.message, "synthesized rollback reported an error");
                self.op = OpState::AwaitingRollbackReply { replay, respond };
            }
            _ => {
                self.op = OpState::AwaitingRollbackReply { replay, respond };
            }
        }
    }
}

/// Which bookkeeping statement a reply belongs to.
#[derive(Debug, Clone, Copy)]
enum BookkeepingStep {
    VersionCapture,
    PermissionsWrite,
}
