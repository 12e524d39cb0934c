//! What the UI can ask of a GATT session

use crate::domain::errors::GattError;
use uuid::Uuid;

/// Command interface of a GATT session.
///
/// Every call is fire-and-forget: `Ok` only means the request was accepted,
/// the outcome arrives later as a
/// [`GattEvent`](crate::domain::models::GattEvent).
pub trait GattCommands {
    fn connect(&mut self, address: &str) -> Result<(), GattError>;
    fn disconnect(&mut self) -> Result<(), GattError>;
    fn discover_services(&mut self) -> Result<(), GattError>;
    fn read_characteristic(&mut self, service: Uuid, characteristic: Uuid)
        -> Result<(), GattError>;
    fn write_characteristic(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), GattError>;
    fn set_indications_state(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), GattError>;
}
