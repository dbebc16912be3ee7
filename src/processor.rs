//! Event-processing task
//!
//! The gateway must be driven from a single serialized context: every
//! source (application, transport call-ins, voice call-ins, timers, the
//! collision observer) posts into a channel, and [`run`] consumes the
//! merged stream one message at a time. Collision notifications arrive on
//! their own channel so the lower layers never block behind application
//! traffic, but they are folded into the same serialized loop before they
//! touch any record.
//!
//! # Usage
//!
//! Spawn [`run`] as an Embassy task and feed the channels from the other
//! layers:
//!
//! ```rust,ignore
//! use hfp_ag::{processor, AgEvent, AgMessage, AudioGateway, ParseMode};
//!
//! let mut gateway = AudioGateway::new(callouts);
//! processor::AG_EVENT_CHANNEL
//!     .sender()
//!     .send(AgMessage::global(AgEvent::Enable {
//!         parse_mode: ParseMode::Full,
//!     }))
//!     .await;
//! processor::run(&mut gateway).await;
//! ```

use crate::callout::Callouts;
use crate::collision::CollisionSource;
use crate::constants::{COLLISION_CHANNEL_DEPTH, EVENT_CHANNEL_DEPTH};
use crate::event::{AgEvent, AgMessage};
use crate::router::AudioGateway;
use crate::BluetoothAddress;
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

/// A collision observed by a lower layer, delivered out-of-band from the
/// main event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CollisionNotification {
    /// Peer both sides tried to connect to/from
    pub peer_addr: BluetoothAddress,
    /// Layer that detected the collision
    pub source: CollisionSource,
}

/// Inbound messages from every event source
pub static AG_EVENT_CHANNEL: Channel<CriticalSectionRawMutex, AgMessage, EVENT_CHANNEL_DEPTH> =
    Channel::new();

/// Collision notifications from the link and session layers
pub static COLLISION_CHANNEL: Channel<
    CriticalSectionRawMutex,
    CollisionNotification,
    COLLISION_CHANNEL_DEPTH,
> = Channel::new();

/// Drive the gateway from the two channels. Never returns; routing errors
/// are logged and the loop moves on to the next message.
pub async fn run<C: Callouts>(gateway: &mut AudioGateway<C>) -> ! {
    loop {
        let msg = match select(
            AG_EVENT_CHANNEL.receiver().receive(),
            COLLISION_CHANNEL.receiver().receive(),
        )
        .await
        {
            Either::First(msg) => msg,
            Either::Second(collision) => AgMessage::global(AgEvent::Collision {
                peer_addr: collision.peer_addr,
                source: collision.source,
            }),
        };
        if gateway.handle_message(msg).is_err() {
            debug!("ag: message dropped by router");
        }
    }
}
