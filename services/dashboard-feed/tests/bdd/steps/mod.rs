mod handshake_steps;
mod heartbeat_steps;
mod routing_steps;
