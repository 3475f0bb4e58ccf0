pub mod busdays;
pub mod convert;
pub mod human;
pub mod text;

pub use busdays::{calculate_time_spent, BusinessCalendar};
pub use convert::{
    convert_datetime, parse_tracker_datetime, DATETIME_QUERY_FORMAT, DATETIME_SINK_FORMAT,
};
pub use human::{from_human_time, to_human_time};
pub use text::{string_normalize, to_snake_case};
