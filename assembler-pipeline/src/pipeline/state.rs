use state_machines::state_machine;

state_machine! {
    name: AssemblyMachine,
    state: AssemblyState,
    initial: Ready,
    states: [
        Ready, Assembled, SizeVerified, DigestVerified, Extracted,
        HeaderParsed, Enriched, Persisted, Failed
    ],
    events {
        assemble { transition: { from: Ready, to: Assembled } }
        verify_size { transition: { from: Assembled, to: SizeVerified } }
        verify_digest { transition: { from: SizeVerified, to: DigestVerified } }
        extract { transition: { from: DigestVerified, to: Extracted } }
        parse_header { transition: { from: Extracted, to: HeaderParsed } }
        enrich { transition: { from: HeaderParsed, to: Enriched } }
        persist { transition: { from: Enriched, to: Persisted } }
        abort {
            transition: { from: Ready, to: Failed }
            transition: { from: Assembled, to: Failed }
            transition: { from: SizeVerified, to: Failed }
            transition: { from: DigestVerified, to: Failed }
            transition: { from: Extracted, to: Failed }
            transition: { from: HeaderParsed, to: Failed }
            transition: { from: Enriched, to: Failed }
            transition: { from: Persisted, to: Failed }
        }
    }
}

pub fn ready() -> AssemblyMachine<(), Ready> {
    AssemblyMachine::new(())
}
