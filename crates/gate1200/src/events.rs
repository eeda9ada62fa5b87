/// The internal event bus: station database and message manager publish,
/// the SSE feed (one subscription per browser) consumes.
use serde_json::Value;
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub enum GateEvent {
    StationUpdate(Value),
    WeatherUpdate(Value),
    MessageReceived(Value),
    GpsUpdate(Value),
}

impl GateEvent {
    /// The SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            GateEvent::StationUpdate(_) => "station_update",
            GateEvent::WeatherUpdate(_) => "weather_update",
            GateEvent::MessageReceived(_) => "message_received",
            GateEvent::GpsUpdate(_) => "gps_update",
        }
    }

    pub fn payload(&self) -> &Value {
        match self {
            GateEvent::StationUpdate(v)
            | GateEvent::WeatherUpdate(v)
            | GateEvent::MessageReceived(v)
            | GateEvent::GpsUpdate(v) => v,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<GateEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        EventBus { sender }
    }

    /// Fire and forget; an event with no subscribers is fine.
    pub fn publish(&self, event: GateEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GateEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
