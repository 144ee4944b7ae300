pub mod home_assistant;
pub mod mqtt_config;
pub mod mqtt_wrapper;
pub mod simple_mqtt;
