//! Level router: the registration / PIN-management state machine.
//!
//! Every gateway request carries the whole text typed so far. The session
//! remembers how many tokens it has already consumed, so each request only
//! processes the tokens that are new since the last one. One token drives
//! exactly one transition, and each transition is persisted before the next
//! token is looked at.
//!
//! Transitions that call the provisioning bridge first claim their
//! (level, consumed) position in the store. Only the claim holder runs the
//! side effect, so concurrent copies of one request provision at most once.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::level::Level;
use super::menu::Screen;
use super::session::{EventKind, GatewayRequest, SessionDetail, UssdEvent, UssdSession};
use super::tokenizer::Tokens;
use super::validators;
use crate::error::{DatabaseError, UssdError};
use crate::phone::PhoneNormalizer;
use crate::provisioning::{NewAccount, PinHasher, ProvisioningBridge};
use crate::store::traits::SessionStore;

/// Top-level menu choice that starts registration.
const CHOICE_REGISTER: &str = "1";
/// Post-registration menu choices.
const CHOICE_OPT_OUT: &str = "1";
const CHOICE_CHANGE_PIN: &str = "2";

/// Provisioning call a transition depends on.
enum Effect {
    CreateAccount(NewAccount),
    UpdatePin(String),
    OptOut,
}

/// Result of applying one token at one level.
struct Outcome {
    next: Level,
    screen: Screen,
    event: Option<EventKind>,
    effect: Option<Effect>,
}

impl Outcome {
    fn advance(next: Level, screen: Screen, event: EventKind) -> Self {
        Self {
            next,
            screen,
            event: Some(event),
            effect: None,
        }
    }

    /// The answer was rejected; stay at `level` and show a corrective prompt.
    fn reject(level: Level, screen: Screen) -> Self {
        Self {
            next: level,
            screen,
            event: None,
            effect: None,
        }
    }

    fn provisioning(mut self, effect: Effect) -> Self {
        self.effect = Some(effect);
        self
    }
}

/// Drives USSD sessions through the dialog.
pub struct UssdRouter {
    sessions: Arc<dyn SessionStore>,
    bridge: Arc<dyn ProvisioningBridge>,
    phones: PhoneNormalizer,
    hasher: PinHasher,
}

impl UssdRouter {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        bridge: Arc<dyn ProvisioningBridge>,
        phones: PhoneNormalizer,
        hasher: PinHasher,
    ) -> Self {
        Self {
            sessions,
            bridge,
            phones,
            hasher,
        }
    }

    /// Handle one gateway round trip and return the screen to show.
    ///
    /// Validation failures are screens, not errors. Errors are reserved for
    /// malformed requests, unparseable phone numbers, and store or
    /// provisioning failures; in those cases the failing step is not
    /// persisted so a gateway retry re-attempts it.
    pub async fn handle(&self, request: &GatewayRequest) -> Result<Screen, UssdError> {
        request.validate()?;

        let mut session = match self.sessions.get_session(&request.session_id).await? {
            Some(session) => session,
            None => self.start_session(request).await?,
        };

        if session.level.is_terminal() {
            debug!(session_id = %session.session_id, "Request for closed session");
            return Ok(Screen::SessionClosed);
        }

        let tokens = Tokens::parse(&request.text);
        if tokens.len() < session.consumed {
            debug!(
                session_id = %session.session_id,
                tokens = tokens.len(),
                consumed = session.consumed,
                "Stale retransmission"
            );
        }

        let mut screen = Screen::prompt_for(session.level);
        for (index, token) in tokens.unconsumed(session.consumed) {
            if session.level.is_terminal() {
                break;
            }
            let from = session.level;
            let Outcome {
                next,
                screen: next_screen,
                event,
                effect,
            } = self.apply(&session, token).await?;
            debug_assert!(from.can_transition_to(next));

            if let Some(effect) = effect {
                if !self
                    .sessions
                    .claim_transition(&session.session_id, from, session.consumed)
                    .await?
                {
                    warn!(
                        session_id = %session.session_id,
                        level = %from,
                        "Transition already claimed by a concurrent request"
                    );
                    return self.current_screen(&session.session_id).await;
                }
                if let Err(e) = self.provision(&session, effect).await {
                    if let Err(release) = self.sessions.release_claim(&session.session_id).await {
                        warn!(
                            session_id = %session.session_id,
                            error = %release,
                            "Failed to release transition claim"
                        );
                    }
                    return Err(e);
                }
            }

            session = match self
                .sessions
                .advance_level(&session.session_id, next, index + 1)
                .await
            {
                Ok(updated) => updated,
                Err(DatabaseError::Conflict { reason, .. }) => {
                    // A concurrent request for the same session got there first
                    warn!(session_id = %session.session_id, %reason, "Session advanced concurrently");
                    return self.current_screen(&session.session_id).await;
                }
                Err(e) => return Err(e.into()),
            };

            if let Some(kind) = event {
                self.sessions
                    .record_event(&UssdEvent::new(&session, from, kind))
                    .await?;
            }
            if from != session.level {
                info!(
                    session_id = %session.session_id,
                    from = %from,
                    to = %session.level,
                    "USSD level advanced"
                );
            }
            screen = next_screen;
        }

        Ok(screen)
    }

    /// Create the session on first contact.
    async fn start_session(&self, request: &GatewayRequest) -> Result<UssdSession, UssdError> {
        let phone = self.phones.normalize(&request.phone_number)?;
        let (session, inserted) = self
            .sessions
            .create_session(&request.session_id, &phone)
            .await?;
        // A concurrent first contact may have inserted the row already
        if inserted {
            self.sessions
                .record_event(&UssdEvent::new(
                    &session,
                    Level::Welcome,
                    EventKind::SessionStarted,
                ))
                .await?;
            info!(session_id = %session.session_id, "USSD session started");
        }
        Ok(session)
    }

    /// Re-read the session and render whatever it currently shows.
    async fn current_screen(&self, session_id: &str) -> Result<Screen, UssdError> {
        let session = self.sessions.get_session(session_id).await?.ok_or_else(|| {
            DatabaseError::NotFound {
                entity: "ussd_session".into(),
                id: session_id.to_string(),
            }
        })?;
        Ok(Screen::prompt_for(session.level))
    }

    /// Run a claimed transition's provisioning call.
    async fn provision(&self, session: &UssdSession, effect: Effect) -> Result<(), UssdError> {
        let phone = session.phone_number.as_str();
        match effect {
            Effect::CreateAccount(account) => {
                let account_ref = self.bridge.create_account_and_pin(account).await?;
                info!(
                    session_id = %session.session_id,
                    account_id = %account_ref.account_id,
                    "Registration complete"
                );
            }
            Effect::UpdatePin(pin) => {
                self.bridge.update_pin(phone, &pin).await?;
                info!(session_id = %session.session_id, "PIN changed");
            }
            Effect::OptOut => {
                self.bridge.opt_out(phone).await?;
                info!(session_id = %session.session_id, "Subscriber opted out");
            }
        }
        Ok(())
    }

    /// Apply one token at the session's current level.
    ///
    /// Records the level's local state (details, staged PIN) and decides the
    /// transition. Provisioning is returned as an [`Effect`] for the caller
    /// to run under a claim.
    async fn apply(&self, session: &UssdSession, token: &str) -> Result<Outcome, UssdError> {
        let id = session.session_id.as_str();
        let level = session.level;

        let outcome = match level {
            Level::Welcome => {
                if token == CHOICE_REGISTER {
                    Outcome::advance(Level::FirstName, Screen::FirstName, EventKind::ChoseRegister)
                } else {
                    Outcome::reject(level, Screen::WelcomeInvalidChoice)
                }
            }
            Level::FirstName => {
                if validators::is_valid_name(token) {
                    self.sessions
                        .record_detail(id, &SessionDetail::FirstName(token.to_string()))
                        .await?;
                    Outcome::advance(Level::LastName, Screen::LastName, EventKind::EnteredFirstName)
                } else {
                    Outcome::reject(level, Screen::InvalidName)
                }
            }
            Level::LastName => {
                if validators::is_valid_name(token) {
                    self.sessions
                        .record_detail(id, &SessionDetail::LastName(token.to_string()))
                        .await?;
                    Outcome::advance(
                        Level::DateOfBirth,
                        Screen::DateOfBirth,
                        EventKind::EnteredLastName,
                    )
                } else {
                    Outcome::reject(level, Screen::InvalidName)
                }
            }
            Level::DateOfBirth => match validators::parse_date_of_birth(token) {
                Some(date) => {
                    self.sessions
                        .record_detail(id, &SessionDetail::DateOfBirth(date))
                        .await?;
                    Outcome::advance(Level::Pin, Screen::Pin, EventKind::EnteredDateOfBirth)
                }
                None => Outcome::reject(level, Screen::InvalidDateOfBirth),
            },
            Level::Pin => {
                if validators::is_valid_pin(token) {
                    let pin_hash = self.hasher.hash(token).await?;
                    self.sessions.stage_pin(id, &pin_hash).await?;
                    Outcome::advance(Level::ConfirmPin, Screen::ConfirmPin, EventKind::EnteredPin)
                } else {
                    Outcome::reject(level, Screen::InvalidPin)
                }
            }
            Level::ConfirmPin => {
                if self.pin_matches(session, token).await? {
                    Outcome::advance(
                        Level::PostRegistration,
                        Screen::PostRegistration,
                        EventKind::AccountCreated,
                    )
                    .provisioning(Effect::CreateAccount(new_account(session, token)?))
                } else {
                    self.sessions.clear_staged_pin(id).await?;
                    Outcome::advance(
                        Level::Closed,
                        Screen::ConfirmPinMismatch,
                        EventKind::PinConfirmationFailed,
                    )
                }
            }
            Level::PostRegistration => match token {
                CHOICE_OPT_OUT => {
                    Outcome::advance(Level::Closed, Screen::OptedOut, EventKind::OptedOut)
                        .provisioning(Effect::OptOut)
                }
                CHOICE_CHANGE_PIN => Outcome::advance(
                    Level::CurrentPin,
                    Screen::CurrentPin,
                    EventKind::ChoseChangePin,
                ),
                _ => Outcome::reject(level, Screen::PostRegistrationInvalidChoice),
            },
            Level::CurrentPin => {
                if self.pin_matches(session, token).await? {
                    Outcome::advance(Level::NewPin, Screen::NewPin, EventKind::EnteredCurrentPin)
                } else {
                    Outcome::reject(level, Screen::CurrentPinMismatch)
                }
            }
            Level::NewPin => {
                if validators::is_valid_pin(token) {
                    let pin_hash = self.hasher.hash(token).await?;
                    self.sessions.stage_pin(id, &pin_hash).await?;
                    Outcome::advance(
                        Level::ConfirmNewPin,
                        Screen::ConfirmNewPin,
                        EventKind::EnteredNewPin,
                    )
                } else {
                    Outcome::reject(level, Screen::InvalidPin)
                }
            }
            Level::ConfirmNewPin => {
                if self.pin_matches(session, token).await? {
                    Outcome::advance(Level::Closed, Screen::PinChanged, EventKind::PinChanged)
                        .provisioning(Effect::UpdatePin(token.to_string()))
                } else {
                    Outcome::reject(level, Screen::ConfirmNewPinMismatch)
                }
            }
            Level::Closed => Outcome::reject(level, Screen::SessionClosed),
        };

        Ok(outcome)
    }

    async fn pin_matches(&self, session: &UssdSession, pin: &str) -> Result<bool, UssdError> {
        Ok(self
            .hasher
            .verify(pin, session.staged_pin.as_deref())
            .await?)
    }
}

/// Assemble the registration from the details collected on the session.
fn new_account(session: &UssdSession, pin: &str) -> Result<NewAccount, UssdError> {
    let missing = |field: &str| {
        UssdError::Database(DatabaseError::Constraint(format!(
            "session {} has no {field}",
            session.session_id
        )))
    };
    Ok(NewAccount {
        phone_number: session.phone_number.clone(),
        first_name: session
            .first_name
            .clone()
            .ok_or_else(|| missing("first_name"))?,
        last_name: session
            .last_name
            .clone()
            .ok_or_else(|| missing("last_name"))?,
        date_of_birth: session
            .date_of_birth
            .ok_or_else(|| missing("date_of_birth"))?,
        pin: pin.to_string(),
    })
}
