//! Connect-button state and the game gate, kept current by a status subscriber.

use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;
use wl_api_types::locale::{Language, locale};
use wl_api_types::{ButtonView, Session};
use wl_connector::{Connector, Subscription};
use wl_payload::short_form;

#[derive(Default)]
struct PresenterState {
    session: Option<Session>,
    /// One-way: the game is created on the first connection and never torn down.
    game_unlocked: bool,
}

pub(crate) struct Presenter {
    state: Arc<Mutex<PresenterState>>,
    _subscription: Subscription,
}

fn lock(state: &Mutex<PresenterState>) -> MutexGuard<'_, PresenterState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Presenter {
    pub fn attach(connector: &Connector) -> Self {
        let state = Arc::new(Mutex::new(PresenterState::default()));
        let sink = state.clone();
        let subscription = connector.on_status_change(move |change| {
            let mut state = lock(&sink);
            if change.is_some() && !state.game_unlocked {
                state.game_unlocked = true;
                info!("first wallet connection observed; game unlocked");
            }
            state.session = change;
        });

        Self {
            state,
            _subscription: subscription,
        }
    }

    pub fn session(&self) -> Option<Session> {
        lock(&self.state).session.clone()
    }

    pub fn game_unlocked(&self) -> bool {
        lock(&self.state).game_unlocked
    }

    pub fn button(&self, language: Language) -> ButtonView {
        button_view(self.session().as_ref(), language)
    }
}

pub(crate) fn button_view(session: Option<&Session>, language: Language) -> ButtonView {
    let text = locale(language);
    match session {
        Some(session) => ButtonView {
            label: short_form(session.address()),
            menu: vec![
                text.copy_address.to_owned(),
                text.disconnect_wallet.to_owned(),
            ],
            connected: true,
        },
        None => ButtonView {
            label: text.connect_wallet.to_owned(),
            menu: Vec::new(),
            connected: false,
        },
    }
}
