pub mod toyota;
