mod test_collocation;
mod test_retractor;
