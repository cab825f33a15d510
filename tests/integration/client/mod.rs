mod append_read;
mod close;
mod forward;
mod pool_resolve;
mod signatures;
mod subscribe;
