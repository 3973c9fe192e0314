pub mod commit;
pub mod event;
pub mod report;
pub mod repo;
pub mod verdict;
