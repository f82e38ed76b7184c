//! Route definitions for the `/v1` API surface

mod drivers;
mod payments;
mod riders;
mod rides;
mod tenants;
mod trips;

pub use drivers::driver_routes;
pub use payments::payment_routes;
pub use riders::rider_routes;
pub use rides::ride_routes;
pub use tenants::tenant_routes;
pub use trips::trip_routes;
