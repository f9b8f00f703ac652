// Business domains
pub mod crawling;
