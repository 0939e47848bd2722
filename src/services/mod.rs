pub mod datasource_service;
pub mod event_bus;
pub mod lock_service;
pub mod media_service;
pub mod mutation_service;
pub mod reconcile_service;
pub mod remote_service;
pub mod settings_service;
pub mod signal_service;
pub mod transfer_service;
