mod clone_delete;
mod mirror;
