//! Built-in tools

mod time;
mod weather;

pub use time::TimeTool;
pub use weather::{sanitize_location, WeatherTool};

use voice_loop_config::ToolsConfig;

use crate::{ToolError, ToolRegistry};

/// Register `get_weather` and `get_time`
pub fn register_builtin_tools(
    registry: &mut ToolRegistry,
    config: &ToolsConfig,
) -> Result<(), ToolError> {
    registry.register(WeatherTool::new(config.weather_base_url.clone()))?;
    registry.register(TimeTool::new())?;
    Ok(())
}
