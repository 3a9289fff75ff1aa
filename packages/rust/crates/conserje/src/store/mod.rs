//! Connection plumbing for the shared coordination store.
//!
//! Every Redis-backed concern (queue, lock, transcript, facts) talks to the
//! store through [`RedisHandle`], which owns one multiplexed connection and
//! retries a failed command exactly once on a fresh connection.

mod redis_backend;

pub(crate) use redis_backend::RedisHandle;
