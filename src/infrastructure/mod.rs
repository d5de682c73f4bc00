pub mod live_broker;
pub mod okx_client;
pub mod sim_broker;
