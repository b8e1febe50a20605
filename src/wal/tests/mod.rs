mod tests_replay;
