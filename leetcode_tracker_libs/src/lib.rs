pub mod api;
pub mod leetcode;
