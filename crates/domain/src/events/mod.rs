pub mod product_events;
