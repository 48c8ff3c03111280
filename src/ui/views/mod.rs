mod domains;
mod owner;
mod schedules;

pub use domains::DomainListView;
pub use owner::SiteOwnerView;
pub use schedules::ScheduleListView;
