mod background;
mod cancellation;
mod composition;
mod fixtures;
mod interception;
mod observers;
