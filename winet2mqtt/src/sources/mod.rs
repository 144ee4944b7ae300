pub mod winet;
