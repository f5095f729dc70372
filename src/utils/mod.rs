pub mod path_utils;
pub mod session_log;
pub mod text;
