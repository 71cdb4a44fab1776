// Signal timing, in time units.
pub const DEFAULT_GREEN_DURATION: f64 = 30.0;
pub const DEFAULT_YELLOW_DURATION: f64 = 5.0;
pub const DEFAULT_RED_DURATION: f64 = 30.0;
pub const MIN_GREEN_TIME: f64 = 10.0;
pub const MAX_GREEN_TIME: f64 = 60.0;
pub const DEFAULT_OVERRIDE_DURATION: f64 = 15.0;

// One time unit is one second unless configured otherwise.
pub const DEFAULT_TIME_UNIT_MS: u64 = 1000;

// Sensor emission interval range, in time units.
pub const SENSOR_MIN_INTERVAL: f64 = 3.0;
pub const SENSOR_MAX_INTERVAL: f64 = 7.0;

// Detection source
pub const EMERGENCY_CONFIDENCE_THRESHOLD: f32 = 0.7;
pub const DEFAULT_FRAME_INTERVAL: f64 = 1.0;
pub const DEFAULT_FRAME_WIDTH: u32 = 640;
pub const DEFAULT_FRAME_HEIGHT: u32 = 480;
pub const VEHICLE_LABELS: [&str; 4] = ["car", "truck", "bus", "motorbike"];
pub const EMERGENCY_LABEL: &str = "ambulance";

// Locations
pub const DEFAULT_INTERSECTION: &str = "Intersection A";
pub const DEFAULT_SENSOR_LOCATIONS: [&str; 3] = ["Intersection A", "Intersection B", "Intersection C"];
pub const UNKNOWN_LOCATION: &str = "Unknown Location";

// Report outputs
pub const HISTORY_CSV: &str = "traffic_history.csv";
pub const HISTORY_PLOT: &str = "traffic_volume.png";
