//! Tool format_coordinates: Render a latitude/longitude pair in degrees, minutes, seconds.

use async_trait::async_trait;
use serde_json::{Map, Value};
use switchboard::{InputSchema, Parameter};

use crate::render::RenderContext;

use super::Tool;

pub struct FormatCoordinates {
    schema: InputSchema,
}

impl FormatCoordinates {
    pub fn new() -> Self {
        Self {
            schema: InputSchema::new()
                .param(
                    Parameter::number("latitude")
                        .required()
                        .range(-90.0, 90.0)
                        .description("Latitude in decimal degrees"),
                )
                .param(
                    Parameter::number("longitude")
                        .required()
                        .range(-180.0, 180.0)
                        .description("Longitude in decimal degrees"),
                ),
        }
    }
}

impl Default for FormatCoordinates {
    fn default() -> Self {
        Self::new()
    }
}

/// Format decimal degrees as `D°M'S.s"H`, rounded to a tenth of a second.
pub fn to_dms(value: f64, positive: char, negative: char) -> String {
    let hemisphere = if value < 0.0 { negative } else { positive };
    let tenths = (value.abs() * 36_000.0).round() as u64;
    let degrees = tenths / 36_000;
    let minutes = (tenths % 36_000) / 600;
    let seconds = tenths % 600;
    format!(
        "{degrees}°{minutes}'{}.{}\"{hemisphere}",
        seconds / 10,
        seconds % 10
    )
}

#[async_trait]
impl Tool for FormatCoordinates {
    fn name(&self) -> &str {
        "format_coordinates"
    }

    fn description(&self) -> &str {
        "Format a latitude/longitude pair as degrees, minutes and seconds"
    }

    fn schema(&self) -> &InputSchema {
        &self.schema
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn call(&self, args: Map<String, Value>, ctx: &RenderContext) -> anyhow::Result<()> {
        let latitude = args
            .get("latitude")
            .and_then(Value::as_f64)
            .ok_or_else(|| anyhow::anyhow!("latitude missing"))?;
        let longitude = args
            .get("longitude")
            .and_then(Value::as_f64)
            .ok_or_else(|| anyhow::anyhow!("longitude missing"))?;

        ctx.text(format!(
            "{} {}",
            to_dms(latitude, 'N', 'S'),
            to_dms(longitude, 'E', 'W')
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_dms() {
        assert_eq!(to_dms(40.446111, 'N', 'S'), "40°26'46.0\"N");
        assert_eq!(to_dms(-79.982222, 'E', 'W'), "79°58'56.0\"W");
        assert_eq!(to_dms(0.0, 'N', 'S'), "0°0'0.0\"N");
    }

    #[test]
    fn test_rounding_carries_into_minutes() {
        // 59.99 seconds rounds up to the next minute.
        assert_eq!(to_dms(10.0 + 59.99 / 3600.0, 'N', 'S'), "10°1'0.0\"N");
    }

    #[test]
    fn test_schema_declares_ranges() {
        let tool = FormatCoordinates::new();
        let errors = tool
            .schema()
            .validate(Some(&serde_json::json!({"latitude": 91, "longitude": -181})))
            .unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
