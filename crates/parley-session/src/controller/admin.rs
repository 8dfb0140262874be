use super::CallController;
use crate::admin_auth::{self, ChallengeStep};
use crate::prompt;
use chrono::Utc;
use parley_types::AdminAccess;
use tokio::time::Instant;

impl CallController {
    pub(super) async fn on_admin_text(&mut self, text: &str) {
        let step = match self.admin.as_mut() {
            Some(challenge) => challenge.on_caller_text(text, Instant::now(), &self.settings),
            None => return,
        };
        match step {
            ChallengeStep::Waiting => {}
            ChallengeStep::AskForCode(question) => self.say(&question, false).await,
            ChallengeStep::NotAdmin => {
                tracing::info!(room = %self.session.room_name(), "caller did not confirm admin identity");
                self.leave_admin_flow(true).await;
            }
            ChallengeStep::CodeSpoken(digits) => self.check_code(&digits).await,
        }
    }

    async fn check_code(&mut self, digits: &str) {
        let Some(challenge) = self.admin.as_mut() else {
            return;
        };

        if admin_auth::verify_access_code(digits, &challenge.access().code_hash) {
            admin_auth::reset_failures(challenge.access_mut());
            let access = challenge.access().clone();
            self.admin = None;
            self.persist_lockout(&access).await;
            self.elevate(&access).await;
            return;
        }

        let locked = admin_auth::register_failure(challenge.access_mut(), Utc::now(), &self.settings);
        let retry = !locked && challenge.retry(Instant::now(), &self.settings);
        let access = challenge.access().clone();
        self.persist_lockout(&access).await;
        tracing::info!(
            room = %self.session.room_name(),
            failed_attempts = access.failed_attempts,
            locked,
            "admin access code rejected"
        );

        if retry {
            self.say("That code didn't match. Please say your access code again.", false)
                .await;
        } else {
            self.say("That code didn't match. Let's continue as a regular call.", false)
                .await;
            self.leave_admin_flow(false).await;
        }
    }

    async fn elevate(&mut self, access: &AdminAccess) {
        let room = self.session.room_name().to_string();
        self.instructions =
            prompt::admin_instructions(&self.base_instructions, &self.config, &access.display_name);
        if let Err(e) = self
            .services
            .engine
            .update_instructions(&room, &self.instructions)
            .await
        {
            tracing::warn!(room = %room, error = %e, "failed to switch to admin instructions");
        }
        if let Err(e) = self.services.engine.set_auto_reply(&room, true).await {
            tracing::warn!(room = %room, error = %e, "failed to resume auto reply");
        }
        tracing::info!(room = %room, "admin verified");
        self.say(
            &format!("Thanks, {}. You're verified. How can I help?", access.display_name),
            true,
        )
        .await;
    }

    pub(super) async fn on_admin_timeout(&mut self) {
        tracing::info!(room = %self.session.room_name(), "admin check timed out, continuing as regular call");
        self.leave_admin_flow(true).await;
    }

    /// Abandons the admin check and hands the call to the engine as a
    /// regular call.
    async fn leave_admin_flow(&mut self, greet: bool) {
        self.admin = None;
        if let Err(e) = self
            .services
            .engine
            .set_auto_reply(self.session.room_name(), true)
            .await
        {
            tracing::warn!(room = %self.session.room_name(), error = %e, "failed to resume auto reply");
        }
        if greet {
            self.say(&prompt::greeting(&self.config), true).await;
        }
    }

    async fn persist_lockout(&self, access: &AdminAccess) {
        if let Err(e) = self.services.store.save_admin_lockout(access).await {
            tracing::warn!(room = %self.session.room_name(), error = %e, "failed to persist admin lockout");
        }
    }
}
