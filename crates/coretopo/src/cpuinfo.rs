use log::{debug, error};

use crate::cpuid::CpuId;
use crate::util::parse_int;
use crate::{Error, Result};

const HARDWARE: &str = "Hardware";
const CPU_IMPLEMENTER: &str = "CPU implementer";
const CPU_PART: &str = "CPU part";
const PROCESSOR: &str = "processor";

/// Fill identity gaps from `/proc/cpuinfo` and return the hardware name.
///
/// An unreadable file is not an error: the capture proceeds with whatever
/// identities were read from the cores themselves and the hardware name is
/// reported as unknown.
pub(crate) fn parse_cpuinfo(just_get_hardware_name: bool, cpu_ids: &mut [CpuId]) -> Result<String> {
    let contents = match std::fs::read_to_string("/proc/cpuinfo") {
        Ok(contents) => contents,
        Err(e) => {
            debug!("error opening /proc/cpuinfo: {e}; the core name will be reported as unknown");
            return Ok(String::new());
        }
    };

    parse(&contents, just_get_hardware_name, cpu_ids)
}

/// The parser proper. Sections are separated by blank lines; a
/// `processor:` line binds the implementer and part values that follow it
/// in the same section. Values seen without a binding are held aside and,
/// at end of file, propagated across the observed processor range to any
/// identity still unknown (the pre-3.8 cpuinfo layout has exactly one
/// implementer/part pair for the whole machine).
fn parse(contents: &str, just_get_hardware_name: bool, cpu_ids: &mut [CpuId]) -> Result<String> {
    let mut hardware_name = String::new();
    let mut found_core_name = false;

    let mut processor: Option<usize> = None;
    let mut found_processor_in_section = false;
    let mut min_processor = cpu_ids.len();
    let mut max_processor = 0usize;
    let mut out_of_place_id = CpuId::UNKNOWN;
    let mut invalid_format = false;

    for line in contents.lines() {
        debug!("cpuinfo: {line}");

        if line.is_empty() {
            // new section; nothing binds across a blank line
            processor = None;
            found_processor_in_section = false;
            continue;
        }

        let found_hardware = !found_core_name && line.starts_with(HARDWARE);
        let found_implementer = line.starts_with(CPU_IMPLEMENTER);
        let found_part = line.starts_with(CPU_PART);
        let found_processor = line.starts_with(PROCESSOR);

        if !(found_hardware || found_implementer || found_part || found_processor) {
            continue;
        }

        let value = match line.find(':') {
            Some(colon) if colon + 2 < line.len() && line.is_char_boundary(colon + 2) => {
                &line[colon + 2..]
            }
            _ => {
                debug!("unknown format of /proc/cpuinfo; the core name will be reported as unknown");
                return Ok(hardware_name);
            }
        };

        if found_hardware {
            hardware_name = value.to_string();
            if just_get_hardware_name {
                return Ok(hardware_name);
            }
            found_core_name = true;
        }

        if found_implementer {
            if let Some(implementer) = parse_int(value) {
                match processor {
                    Some(p) => cpu_ids[p].set_implementer(implementer as i32),
                    None => {
                        out_of_place_id.set_implementer(implementer as i32);
                        invalid_format = true;
                    }
                }
            }
        }

        if found_part {
            if let Some(part) = parse_int(value) {
                match processor {
                    Some(p) => cpu_ids[p].set_part(part as i32),
                    None => {
                        out_of_place_id.set_part(part as i32);
                        invalid_format = true;
                    }
                }
            }
        }

        if found_processor {
            let converted = parse_int(value).and_then(|id| usize::try_from(id).ok());

            if let Some(id) = converted {
                min_processor = min_processor.min(id);
                max_processor = max_processor.max(id);
            }

            if found_processor_in_section {
                // a second processor line invalidates the whole section
                processor = None;
                invalid_format = true;
            } else if let Some(id) = converted {
                if id >= cpu_ids.len() {
                    error!("found processor {id} but max is {}", cpu_ids.len());
                    return Err(Error::processor_out_of_range(id, cpu_ids.len()));
                }
                processor = Some(id);
                found_processor_in_section = true;
            }
        }
    }

    if invalid_format && out_of_place_id.is_known() && min_processor <= max_processor {
        let end = if max_processor < cpu_ids.len() {
            max_processor + 1
        } else {
            cpu_ids.len()
        };

        for cpu in min_processor..end {
            if !cpu_ids[cpu].is_known() {
                debug!("setting global cpu identity {out_of_place_id} for processor {cpu}");
                cpu_ids[cpu] = out_of_place_id;
            }
        }
    }

    if !found_core_name {
        debug!("could not determine core name from /proc/cpuinfo; it will be reported as unknown");
    }

    Ok(hardware_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unknown(count: usize) -> Vec<CpuId> {
        vec![CpuId::UNKNOWN; count]
    }

    fn raw(ids: &[CpuId]) -> Vec<i32> {
        ids.iter().map(|id| id.as_i32()).collect()
    }

    #[test]
    fn bound_section_fills_one_processor() {
        let contents = "processor\t: 0\n\
                        CPU implementer\t: 0x41\n\
                        CPU part\t: 0xd03\n";

        let mut ids = unknown(4);
        let name = parse(contents, false, &mut ids).unwrap();

        assert_eq!(name, "");
        assert_eq!(raw(&ids), vec![0x41d03, -1, -1, -1]);
    }

    #[test]
    fn bound_sections_per_processor() {
        let contents = "processor\t: 0\n\
                        CPU implementer\t: 0x41\n\
                        CPU part\t: 0xd03\n\
                        \n\
                        processor\t: 1\n\
                        CPU implementer\t: 0x41\n\
                        CPU part\t: 0xd09\n";

        let mut ids = unknown(2);
        parse(contents, false, &mut ids).unwrap();

        assert_eq!(raw(&ids), vec![0x41d03, 0x41d09]);
    }

    #[test]
    fn pre_linux_3_8_fill_covers_processor_range() {
        // implementer/part appear once, unbound; processors 2..=5 appear in
        // their own sections
        let mut contents = String::from(
            "CPU implementer\t: 0x41\n\
             CPU part\t: 0xd03\n\
             \n",
        );
        for cpu in 2..=5 {
            contents.push_str(&format!("processor\t: {cpu}\n\n"));
        }

        let mut ids = unknown(8);
        parse(&contents, false, &mut ids).unwrap();

        assert_eq!(
            raw(&ids),
            vec![-1, -1, 0x41d03, 0x41d03, 0x41d03, 0x41d03, -1, -1]
        );
    }

    #[test]
    fn pre_linux_3_8_fill_skips_known_entries() {
        let contents = "CPU implementer\t: 0x41\n\
                        CPU part\t: 0xd03\n\
                        \n\
                        processor\t: 0\n\
                        \n\
                        processor\t: 1\n";

        let mut ids = unknown(2);
        ids[0] = CpuId::from_raw(0x41d09);
        parse(contents, false, &mut ids).unwrap();

        assert_eq!(raw(&ids), vec![0x41d09, 0x41d03]);
    }

    #[test]
    fn second_processor_invalidates_section() {
        let contents = "processor\t: 0\n\
                        processor\t: 1\n\
                        CPU implementer\t: 0x41\n\
                        CPU part\t: 0xd03\n";

        let mut ids = unknown(4);
        parse(contents, false, &mut ids).unwrap();

        // the values became out-of-place and the observed range 0..=1 was
        // filled at end of file instead of binding to either processor
        assert_eq!(raw(&ids), vec![0x41d03, 0x41d03, -1, -1]);
    }

    #[test]
    fn hardware_name_is_adopted_once() {
        let contents = "Hardware\t: ARM Juno\n\
                        Hardware\t: second entry ignored\n\
                        processor\t: 0\n";

        let mut ids = unknown(1);
        let name = parse(contents, false, &mut ids).unwrap();

        assert_eq!(name, "ARM Juno");
    }

    #[test]
    fn hardware_name_only_returns_early() {
        let contents = "Hardware\t: ARM Juno\n\
                        processor\t: 7\n";

        // processor 7 would be fatal for a single-cpu vector, but the early
        // return means it is never reached
        let mut ids = unknown(1);
        let name = parse(contents, true, &mut ids).unwrap();

        assert_eq!(name, "ARM Juno");
        assert_eq!(raw(&ids), vec![-1]);
    }

    #[test]
    fn malformed_colon_layout_yields_empty_result() {
        let contents = "processor:\n";

        let mut ids = unknown(2);
        let name = parse(contents, false, &mut ids).unwrap();

        assert_eq!(name, "");
        assert_eq!(raw(&ids), vec![-1, -1]);
    }

    #[test]
    fn processor_beyond_max_is_fatal() {
        let contents = "processor\t: 9\n";

        let mut ids = unknown(4);
        assert!(parse(contents, false, &mut ids).is_err());
    }

    #[test]
    fn unrelated_keys_are_ignored() {
        let contents = "processor\t: 0\n\
                        BogoMIPS\t: 38.40\n\
                        Features\t: fp asimd evtstrm aes\n\
                        CPU implementer\t: 0x41\n\
                        CPU architecture: 8\n\
                        CPU variant\t: 0x0\n\
                        CPU part\t: 0xd08\n\
                        CPU revision\t: 3\n";

        let mut ids = unknown(1);
        parse(contents, false, &mut ids).unwrap();

        assert_eq!(raw(&ids), vec![0x41d08]);
    }

    #[test]
    fn decimal_values_parse_too() {
        let contents = "processor\t: 0\n\
                        CPU implementer\t: 65\n\
                        CPU part\t: 3337\n";

        let mut ids = unknown(1);
        parse(contents, false, &mut ids).unwrap();

        assert_eq!(raw(&ids), vec![(65 << 12) | 3337]);
    }
}
