use std::sync::Arc;

use crate::models::{Actor, BookingStateChanged, BookingStatus, UserId};
use crate::services::booking::EventReceiver;
use crate::services::messaging::Dispatcher;

/// Who should hear about a state change and what to tell them.
pub fn render(event: &BookingStateChanged) -> Option<(UserId, String)> {
    let b = &event.booking;
    match (b.status, event.actor) {
        (BookingStatus::Confirmed, _) => Some((
            b.provider_id,
            format!(
                "New booking #{}: client {} on {} at {}.",
                b.id, b.client_id, b.date, b.slot
            ),
        )),
        (BookingStatus::Cancelled, Actor::Client(_)) => Some((
            b.provider_id,
            format!(
                "Booking #{} on {} at {} was cancelled by the client.",
                b.id, b.date, b.slot
            ),
        )),
        (BookingStatus::Cancelled, _) => Some((
            b.client_id,
            format!(
                "Your booking on {} at {} was cancelled by the provider.",
                b.date, b.slot
            ),
        )),
        (BookingStatus::Done, _) => Some((
            b.client_id,
            format!(
                "Your visit on {} at {} is complete. \
                 Please rate it from 1 to 5 stars (booking #{}).",
                b.date, b.slot, b.id
            ),
        )),
        _ => None,
    }
}

pub async fn deliver(dispatcher: &dyn Dispatcher, event: &BookingStateChanged) -> bool {
    let Some((recipient, text)) = render(event) else {
        return true;
    };
    match dispatcher.send(recipient, &text).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(
                booking_id = event.booking.id,
                recipient,
                error = %e,
                "failed to deliver notification"
            );
            false
        }
    }
}

/// Drain engine events until every sender is gone. Delivery failures never
/// reach the engine; the persisted transition stands either way.
pub async fn run_notifier(mut events: EventReceiver, dispatcher: Arc<dyn Dispatcher>) {
    tracing::info!("notifier started");
    while let Some(event) = events.recv().await {
        deliver(dispatcher.as_ref(), &event).await;
    }
    tracing::info!("notifier stopped");
}
