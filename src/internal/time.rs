use super::{def, FeedbackContext, InternalDefinition, InternalFragment};
use chrono::Timelike;
use serde_json::Value;

const VARIABLES: &[InternalDefinition] = &[
    def("time_hms", "Time of day (HH:MM:SS)"),
    def("time_h", "Hour of day"),
    def("time_m", "Minute of hour"),
    def("time_s", "Seconds of minute"),
    def("time_unix", "Seconds since 1970"),
    def("date_iso", "Date (YYYY-MM-DD)"),
];

/// Clock variables, refreshed on every tick
pub struct Time;

impl InternalFragment for Time {
    fn name(&self) -> &'static str {
        "time"
    }

    fn variable_definitions(&self) -> &'static [InternalDefinition] {
        VARIABLES
    }

    fn variable_values(&self, ctx: &FeedbackContext<'_>) -> Vec<(String, Value)> {
        let now = ctx.now;
        vec![
            ("time_hms".to_string(), Value::from(now.format("%H:%M:%S").to_string())),
            ("time_h".to_string(), Value::from(format!("{:02}", now.hour()))),
            ("time_m".to_string(), Value::from(format!("{:02}", now.minute()))),
            ("time_s".to_string(), Value::from(format!("{:02}", now.second()))),
            ("time_unix".to_string(), Value::from(now.timestamp())),
            ("date_iso".to_string(), Value::from(now.format("%Y-%m-%d").to_string())),
        ]
    }
}
