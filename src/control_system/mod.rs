pub mod traffic_light_controller;

pub use traffic_light_controller::{
    compute_green_times, ControllerError, GreenTimeAllocation, IntersectionSignal, SignalController,
    SignalControllerHandle, SignalSnapshot, SignalState,
};
