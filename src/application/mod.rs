pub mod bootstrap;
pub mod commands;
pub mod completion;
pub mod focus_service;
pub mod lifecycle;
pub mod reflection;
pub mod session_controller;
pub mod timer_engine;
