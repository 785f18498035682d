pub mod interface;
pub mod local;
pub mod types;

pub use interface::{ClientError, ClientEvent, ListenerId, TurnServersListener, WidgetClient};
pub use local::{LocalClient, OutboundToDevice};
pub use types::{
    ClientTurnServer, DeviceInfo, DeviceMap, DeviceTarget, Direction, RelationsOptions,
    RelationsResponse, ToDeviceBatch, ToDeviceMessage,
};
