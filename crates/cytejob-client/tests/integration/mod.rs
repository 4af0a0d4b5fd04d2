mod common;
mod lifecycle_tests;
mod transport_tests;
