//! Generic runtime for engine orchestration.
//!
//! The runtime is the single cooperative task queue the engine lives on. It
//! coordinates between:
//! - [`SyncEngine`]: the synchronization state machine
//! - [`Driver`]: platform-specific store and auth I/O
//!
//! Each input is one tick: the runtime hands it to the engine, executes the
//! resulting actions through the driver in order, and flushes the coalesced
//! notification last.

use std::collections::HashMap;

use crate::{
    Driver, EngineAction, EngineEvent, EngineInput, Intent, IntentReply, RequestId, SyncEngine,
    SyncError,
};

/// Generic runtime that drives a [`SyncEngine`] with a [`Driver`].
pub struct Runtime<D: Driver> {
    driver: D,
    engine: SyncEngine,
    /// Sign-in and sign-out replies, answered on `AuthCompleted`.
    auth_replies: HashMap<RequestId, IntentReply>,
}

impl<D: Driver> Runtime<D> {
    /// Create a runtime around an engine.
    ///
    /// Register the observer on the engine before calling
    /// [`Runtime::run`]; it receives the initial state on the first flush.
    pub fn new(driver: D, engine: SyncEngine) -> Self {
        Self { driver, engine, auth_replies: HashMap::new() }
    }

    /// Run until the driver reports the end of input.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver encounters an I/O error.
    pub async fn run(&mut self) -> Result<(), D::Error> {
        let actions = self.engine.start();
        self.execute(actions).await?;
        self.engine.flush();

        while let Some(input) = self.driver.poll_input().await? {
            let actions = self.process(input);
            self.execute(actions).await?;
        }

        tracing::info!(pending = self.engine.pending_requests(), "input closed, runtime stopping");
        Ok(())
    }

    /// Feed one input to the engine and return its actions.
    fn process(&mut self, input: EngineInput) -> Vec<EngineAction> {
        match input {
            EngineInput::Event(event) => {
                if let EngineEvent::AuthCompleted { request, result } = &event
                    && let Some(reply) = self.auth_replies.remove(request)
                {
                    let _ = reply.send(result.clone().map_err(SyncError::from));
                }
                self.engine.handle(event)
            },
            EngineInput::Intent { intent, reply } => self.process_intent(intent, reply),
        }
    }

    fn process_intent(&mut self, intent: Intent, reply: Option<IntentReply>) -> Vec<EngineAction> {
        let outcome = match intent {
            Intent::CreateRoom { name } => self.engine.create_room(&name),
            Intent::SelectRoom { room_id } => Ok(self.engine.select_room(&room_id)),
            Intent::DeleteRoom { room_id } => self.engine.delete_room(&room_id),
            Intent::SetNickname { nickname } => self.engine.set_nickname(&nickname),
            Intent::SendMessage { body } => self.engine.send_message(&body),
            Intent::DismissError => Ok(self.engine.dismiss_error()),
            Intent::SignIn => {
                let (request, actions) = self.engine.sign_in();
                self.await_auth(request, reply);
                return actions;
            },
            Intent::SignOut => {
                let (request, actions) = self.engine.sign_out();
                self.await_auth(request, reply);
                return actions;
            },
        };

        match outcome {
            Ok(actions) => {
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
                actions
            },
            Err(error) => {
                tracing::debug!(%error, "intent rejected");
                if let Some(reply) = reply {
                    let _ = reply.send(Err(error));
                }
                Vec::new()
            },
        }
    }

    fn await_auth(&mut self, request: RequestId, reply: Option<IntentReply>) {
        if let Some(reply) = reply {
            self.auth_replies.insert(request, reply);
        }
    }

    /// Execute a tick's actions, flushing after the rest.
    async fn execute(&mut self, actions: Vec<EngineAction>) -> Result<(), D::Error> {
        let mut flush = false;
        for action in actions {
            match action {
                EngineAction::ScheduleFlush => flush = true,
                action => self.driver.execute(action).await?,
            }
        }
        if flush {
            self.engine.flush();
        }
        Ok(())
    }

    /// Get a reference to the engine
    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Get a mutable reference to the engine
    pub fn engine_mut(&mut self) -> &mut SyncEngine {
        &mut self.engine
    }

    /// Get a reference to the driver
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Get a mutable reference to the driver
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }
}
