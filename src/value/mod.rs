mod lua_string;
mod lua_value;
mod number;

pub use lua_string::LuaString;
pub use lua_value::LuaValue;
pub use number::{format_number, string_to_number};
