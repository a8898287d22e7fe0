mod client_events;
mod client_queues;
