use std::sync::Mutex;

use crate::{CardRecord, Error};

pub type CardHandler = Box<dyn FnMut(CardRecord) + Send + 'static>;
pub type ErrorHandler = Box<dyn FnMut(Error) + Send + 'static>;

#[derive(Default)]
struct Slots {
    card: Option<CardHandler>,
    error: Option<ErrorHandler>,
}

/// Application callbacks, invoked on the worker thread
///
/// A handler is taken out of its slot while it runs, so it may install a
/// replacement; the replacement wins over the running handler.
#[derive(Default)]
pub struct Handlers(Mutex<Slots>);

impl Handlers {
    fn slots(&self) -> std::sync::MutexGuard<'_, Slots> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_card(&self, handler: CardHandler) {
        self.slots().card = Some(handler);
    }

    pub fn set_error(&self, handler: ErrorHandler) {
        self.slots().error = Some(handler);
    }

    /// Hand `card` to the card handler, if one is installed
    pub fn card(&self, card: CardRecord) {
        let Some(mut handler) = self.slots().card.take() else {
            log::debug!("No card handler, dropping {}", card.uid);
            return;
        };
        handler(card);
        self.slots().card.get_or_insert(handler);
    }

    pub fn error(&self, error: Error) {
        let Some(mut handler) = self.slots().error.take() else {
            return;
        };
        handler(error);
        self.slots().error.get_or_insert(handler);
    }
}
