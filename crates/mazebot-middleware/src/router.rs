//! Channel-keyed dispatch of decoded packets.
//!
//! A [`ChannelRouter`] serves one side of the link.  It decodes frames that
//! arrive in its receive direction and hands each [`Packet`] to the single
//! handler bound to that channel.  It encodes packets for its transmit
//! direction and forwards them to a [`Transport`].
//!
//! Registry lookups take a read lock only long enough to clone the handler, so
//! handlers may call back into the router (e.g. to [`send`][ChannelRouter::send]
//! an acknowledgement).

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use mazebot_types::{Channel, Event, EventPayload, LinkDirection, MazeError, Packet};
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::bus::{EventBus, Topic};
use crate::codec;
use crate::transport::Transport;

/// Callback bound to one channel.
pub type Handler = Arc<dyn Fn(Packet) + Send + Sync>;

/// Snapshot of the router's traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterCounters {
    /// Packets handed to a handler.
    pub delivered: u64,
    /// Well-formed packets with no bound handler.
    pub unrouted: u64,
    /// Frames dropped because they failed to decode.
    pub decode_errors: u64,
    /// Frames accepted by the transport.
    pub sent: u64,
    /// Frames the transport rejected, or packets for the wrong direction.
    pub send_errors: u64,
    /// Debug packets suppressed by the rate limit.
    pub throttled: u64,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    unrouted: AtomicU64,
    decode_errors: AtomicU64,
    sent: AtomicU64,
    send_errors: AtomicU64,
    throttled: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Registry of channel handlers plus the outbound encoder.
pub struct ChannelRouter {
    receive: LinkDirection,
    handlers: RwLock<HashMap<Channel, Handler>>,
    transport: Arc<dyn Transport>,
    debug_limiter: Option<DefaultDirectRateLimiter>,
    bus: Option<EventBus>,
    counters: Counters,
}

impl ChannelRouter {
    /// Router for the robot: receives IN channels, sends OUT channels.
    pub fn robot(transport: Arc<dyn Transport>) -> Self {
        Self::new(LinkDirection::Inbound, transport)
    }

    /// Router for the host: receives OUT channels, sends IN channels.
    pub fn host(transport: Arc<dyn Transport>) -> Self {
        Self::new(LinkDirection::Outbound, transport)
    }

    fn new(receive: LinkDirection, transport: Arc<dyn Transport>) -> Self {
        Self {
            receive,
            handlers: RwLock::new(HashMap::new()),
            transport,
            debug_limiter: None,
            bus: None,
            counters: Counters::default(),
        }
    }

    /// Limit outbound debug packets to `per_second`; `0` disables the limit.
    pub fn with_debug_rate_limit(mut self, per_second: u32) -> Self {
        self.debug_limiter =
            NonZeroU32::new(per_second).map(|n| RateLimiter::direct(Quota::per_second(n)));
        self
    }

    /// Mirror every received frame onto [`Topic::InboundFrames`].
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Direction of the frames this router decodes.
    pub fn receive_direction(&self) -> LinkDirection {
        self.receive
    }

    /// Bind `handler` to `channel`, replacing any previous binding.
    ///
    /// Only channels of the receive direction can be bound.
    pub fn register<F>(&self, channel: Channel, handler: F) -> Result<(), MazeError>
    where
        F: Fn(Packet) + Send + Sync + 'static,
    {
        if channel.direction() != self.receive {
            return Err(MazeError::WrongDirection { channel });
        }
        if self
            .handlers
            .write()
            .insert(channel, Arc::new(handler))
            .is_some()
        {
            debug!(?channel, "handler replaced");
        }
        Ok(())
    }

    /// Remove the handler of `channel`; returns whether one was bound.
    pub fn unregister(&self, channel: Channel) -> bool {
        self.handlers.write().remove(&channel).is_some()
    }

    pub fn is_registered(&self, channel: Channel) -> bool {
        self.handlers.read().contains_key(&channel)
    }

    /// Decode `payload` received on `channel` and invoke its handler.
    ///
    /// Decode failures and unbound channels are logged, counted and returned;
    /// no handler runs in either case.
    pub fn dispatch(&self, channel: Channel, payload: &[u8]) -> Result<(), MazeError> {
        if channel.direction() != self.receive {
            Counters::bump(&self.counters.decode_errors);
            warn!(?channel, "frame for the wrong direction dropped");
            return Err(MazeError::WrongDirection { channel });
        }
        let packet = codec::decode(channel, payload).map_err(|e| {
            Counters::bump(&self.counters.decode_errors);
            warn!(?channel, len = payload.len(), error = %e, "dropping undecodable frame");
            MazeError::from(e)
        })?;
        self.deliver(packet)
    }

    /// Split the channel byte off `frame` and dispatch the rest.
    pub fn dispatch_frame(&self, frame: &[u8]) -> Result<(), MazeError> {
        self.mirror(frame);
        let packet = codec::decode_frame(self.receive, frame).map_err(|e| {
            Counters::bump(&self.counters.decode_errors);
            warn!(len = frame.len(), error = %e, "dropping undecodable frame");
            MazeError::from(e)
        })?;
        self.deliver(packet)
    }

    fn deliver(&self, packet: Packet) -> Result<(), MazeError> {
        let channel = packet.channel();
        let handler = self.handlers.read().get(&channel).cloned();
        match handler {
            Some(handler) => {
                trace!(?channel, "delivering packet");
                handler(packet);
                Counters::bump(&self.counters.delivered);
                Ok(())
            }
            None => {
                Counters::bump(&self.counters.unrouted);
                debug!(?channel, "no handler bound, packet dropped");
                Err(MazeError::RoutingMiss(channel))
            }
        }
    }

    fn mirror(&self, frame: &[u8]) {
        if let Some(bus) = &self.bus
            && bus.subscriber_count(Topic::InboundFrames) > 0
        {
            let event = Event::new(
                "mazebot-middleware::router",
                EventPayload::Frame {
                    direction: self.receive,
                    bytes: frame.to_vec(),
                },
            );
            let _ = bus.publish_to(Topic::InboundFrames, event);
        }
    }

    /// Encode `packet` and hand `[channel id][payload]` to the transport.
    ///
    /// Outbound debug packets over the rate limit are counted and silently
    /// dropped.  A record whose payload does not fit its channel layout (an
    /// over-long path or opaque buffer) is rejected before it reaches the
    /// transport.
    pub fn send(&self, packet: &Packet) -> Result<(), MazeError> {
        let channel = packet.channel();
        if channel.direction() == self.receive {
            Counters::bump(&self.counters.send_errors);
            return Err(MazeError::WrongDirection { channel });
        }
        let frame = codec::encode_frame(packet);
        let layout = channel.payload_size();
        let payload_len = frame.len() - 1;
        if !layout.accepts(payload_len) {
            Counters::bump(&self.counters.send_errors);
            warn!(?channel, len = payload_len, "payload does not fit channel, not sent");
            return Err(MazeError::InvalidParameter {
                name: "payload",
                details: format!("{payload_len} bytes on {channel:?}, expected {layout:?}"),
            });
        }
        if channel == Channel::OutDebug
            && let Some(limiter) = &self.debug_limiter
            && limiter.check().is_err()
        {
            Counters::bump(&self.counters.throttled);
            return Ok(());
        }
        match self.transport.send_bytes(&frame) {
            Ok(()) => {
                Counters::bump(&self.counters.sent);
                Ok(())
            }
            Err(e) => {
                Counters::bump(&self.counters.send_errors);
                warn!(?channel, transport = self.transport.name(), error = %e, "send failed");
                Err(e)
            }
        }
    }

    /// Current value of every counter.
    pub fn counters(&self) -> RouterCounters {
        let c = &self.counters;
        RouterCounters {
            delivered: c.delivered.load(Ordering::Relaxed),
            unrouted: c.unrouted.load(Ordering::Relaxed),
            decode_errors: c.decode_errors.load(Ordering::Relaxed),
            sent: c.sent.load(Ordering::Relaxed),
            send_errors: c.send_errors.load(Ordering::Relaxed),
            throttled: c.throttled.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryTransport;
    use mazebot_types::{DebugMessage, DriveCommand, LogLevel, PathFollowerControl, Point, UserCommand};
    use std::sync::Mutex;

    fn robot() -> (ChannelRouter, InMemoryTransport) {
        let transport = InMemoryTransport::new();
        (ChannelRouter::robot(Arc::new(transport.clone())), transport)
    }

    #[test]
    fn dispatch_invokes_bound_handler() {
        let (router, _) = robot();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        router
            .register(Channel::InDrive, move |p| sink.lock().unwrap().push(p))
            .unwrap();

        router.dispatch(Channel::InDrive, &[0x10, 0x00, 0xf0, 0xff]).unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Packet::Drive(DriveCommand::new(16, -16))]
        );
        assert_eq!(router.counters().delivered, 1);
    }

    #[test]
    fn malformed_drive_is_dropped_and_counted() {
        let (router, _) = robot();
        let calls = Arc::new(Mutex::new(0));
        let c = calls.clone();
        router
            .register(Channel::InDrive, move |_| *c.lock().unwrap() += 1)
            .unwrap();

        let err = router.dispatch_frame(&[0x01, 0x10, 0x00, 0xf0]).unwrap_err();
        assert!(matches!(err, MazeError::Decode(_)));
        assert_eq!(*calls.lock().unwrap(), 0);
        let counters = router.counters();
        assert_eq!(counters.decode_errors, 1);
        assert_eq!(counters.delivered, 0);
    }

    #[test]
    fn unrouted_packets_are_counted() {
        let (router, _) = robot();
        let err = router.dispatch_frame(&[0x06, 0x02]).unwrap_err();
        assert!(matches!(err, MazeError::RoutingMiss(Channel::InUserCommand)));
        assert_eq!(router.counters().unrouted, 1);
    }

    #[test]
    fn last_registration_wins() {
        let (router, _) = robot();
        let hits = Arc::new(Mutex::new(Vec::new()));
        let a = hits.clone();
        let b = hits.clone();
        router
            .register(Channel::InUserCommand, move |_| a.lock().unwrap().push("a"))
            .unwrap();
        router
            .register(Channel::InUserCommand, move |_| b.lock().unwrap().push("b"))
            .unwrap();
        router.dispatch_frame(&[0x06, 0x00]).unwrap();
        assert_eq!(*hits.lock().unwrap(), vec!["b"]);

        assert!(router.unregister(Channel::InUserCommand));
        assert!(!router.is_registered(Channel::InUserCommand));
    }

    #[test]
    fn register_rejects_transmit_channels() {
        let (router, _) = robot();
        assert!(matches!(
            router.register(Channel::OutTelemetry, |_| {}),
            Err(MazeError::WrongDirection { .. })
        ));
    }

    #[test]
    fn shared_ids_resolve_by_direction() {
        let transport = InMemoryTransport::new();
        let host = ChannelRouter::host(Arc::new(transport));
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        host.register(Channel::OutGetPose, move |p| *s.lock().unwrap() = Some(p))
            .unwrap();
        // 0x05 is CH_IN_POSE for the robot but CH_OUT_GET_POSE for the host.
        host.dispatch_frame(&[0x05, 0x00]).unwrap();
        assert!(matches!(
            *seen.lock().unwrap(),
            Some(Packet::GetPose(_))
        ));
    }

    #[test]
    fn send_writes_frame_to_transport() {
        let (router, transport) = robot();
        router
            .send(&Packet::GetPose(mazebot_types::GetPose {
                april_tag: mazebot_types::AprilTagType::Main,
            }))
            .unwrap();
        assert_eq!(transport.take(), vec![vec![0x05, 0x00]]);
        assert_eq!(router.counters().sent, 1);
    }

    #[test]
    fn send_rejects_receive_direction() {
        let (router, transport) = robot();
        let err = router
            .send(&Packet::UserCommand(UserCommand { id: 1 }))
            .unwrap_err();
        assert!(matches!(err, MazeError::WrongDirection { .. }));
        assert!(transport.is_empty());
        assert_eq!(router.counters().send_errors, 1);
    }

    #[test]
    fn oversize_records_are_not_sent() {
        let (router, transport) = robot();
        let err = router.send(&Packet::Rdp(vec![0; 300])).unwrap_err();
        assert!(matches!(err, MazeError::InvalidParameter { name: "payload", .. }));

        // A struct literal bypasses the truncating constructor.
        let long = DebugMessage {
            level: LogLevel::Info,
            text: "x".repeat(300),
        };
        assert!(router.send(&Packet::Log(long)).is_err());
        assert!(transport.is_empty());
        assert_eq!(router.counters().send_errors, 2);

        router.send(&Packet::Rdp(vec![0; 256])).unwrap();
        assert_eq!(transport.len(), 1);
    }

    #[test]
    fn over_long_path_is_not_sent() {
        let transport = InMemoryTransport::new();
        let host = ChannelRouter::host(Arc::new(transport.clone()));
        let path = |n: usize| (0..n).map(|i| Point { x: i as i16, y: 0 }).collect::<Vec<_>>();

        let err = host
            .send(&Packet::PathFollowCtrl(PathFollowerControl::new_path(path(256))))
            .unwrap_err();
        assert!(matches!(err, MazeError::InvalidParameter { .. }));
        assert!(transport.is_empty());

        host.send(&Packet::PathFollowCtrl(PathFollowerControl::new_path(path(255))))
            .unwrap();
        let frames = transport.take();
        assert_eq!(frames[0][2], 255);
        let decoded = codec::decode_frame(LinkDirection::Inbound, &frames[0]).unwrap();
        assert!(matches!(decoded, Packet::PathFollowCtrl(c) if c.path.len() == 255));
    }

    #[test]
    fn debug_packets_are_rate_limited() {
        let transport = InMemoryTransport::new();
        let router =
            ChannelRouter::robot(Arc::new(transport.clone())).with_debug_rate_limit(2);
        for _ in 0..5 {
            router
                .send(&Packet::Log(DebugMessage::new(LogLevel::Info, "tick")))
                .unwrap();
        }
        let counters = router.counters();
        assert_eq!(counters.sent + counters.throttled, 5);
        assert!(counters.throttled >= 3);
        assert_eq!(transport.len() as u64, counters.sent);
    }

    #[test]
    fn handler_may_send_through_router() {
        let transport = InMemoryTransport::new();
        let router = Arc::new(ChannelRouter::robot(Arc::new(transport.clone())));
        let weak = Arc::downgrade(&router);
        router
            .register(Channel::InDebug, move |_| {
                if let Some(r) = weak.upgrade() {
                    let _ = r.send(&Packet::Log(DebugMessage::new(LogLevel::Info, "ack")));
                }
            })
            .unwrap();
        router.dispatch_frame(&[0x00, b'h', b'i']).unwrap();
        assert_eq!(transport.len(), 1);
    }

    #[tokio::test]
    async fn inbound_frames_are_mirrored_on_bus() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe_to(Topic::InboundFrames);
        let router =
            ChannelRouter::robot(Arc::new(InMemoryTransport::new())).with_bus(bus.clone());
        let _ = router.dispatch_frame(&[0x06, 0x03]);
        let event = sub.recv().await.unwrap();
        assert!(matches!(
            event.payload,
            EventPayload::Frame { direction: LinkDirection::Inbound, .. }
        ));
    }
}
